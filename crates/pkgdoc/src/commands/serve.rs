//! `pkgdoc serve` command implementation.

use std::path::PathBuf;

use clap::Args;
use pkgdoc_config::{CliSettings, Config};
use pkgdoc_server::run_server;

use crate::error::CliError;
use crate::output::Output;

/// Arguments for the serve command.
#[derive(Args)]
pub(crate) struct ServeArgs {
    /// Path to configuration file (default: auto-discover pkgdoc.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind to (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of concurrent fetches (overrides config).
    #[arg(short, long)]
    workers: Option<usize>,

    /// Module proxy URL (overrides config).
    #[arg(long, env = "PKGDOC_PROXY_URL")]
    proxy_url: Option<String>,

    /// SQLite file for durable fetch state (overrides config).
    #[arg(long)]
    state_db: Option<PathBuf>,

    /// Enable verbose output (info-level logs).
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServeArgs {
    /// Execute the serve command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails or the server fails to start.
    pub(crate) async fn execute(self, version: &str) -> Result<(), CliError> {
        let output = Output::new();

        let cli_settings = CliSettings {
            host: self.host,
            port: self.port,
            workers: self.workers,
            proxy_url: self.proxy_url,
            state_db: self.state_db,
        };
        let config = Config::load(self.config.as_deref(), Some(&cli_settings))?;

        if let Some(path) = &config.config_path {
            output.info(&format!("Config: {}", path.display()));
        }
        output.info(&format!(
            "Starting server on {}:{}",
            config.server.host, config.server.port
        ));
        output.info(&format!("Module proxy: {}", config.fetch.proxy_url));
        output.info(&format!("Fetch workers: {}", config.fetch.workers));
        match &config.fetch.state_db {
            Some(path) => output.info(&format!("Fetch state: {}", path.display())),
            None => output.warning("Fetch state: in memory only (no state_db configured)"),
        }

        run_server(&config, version)
            .await
            .map_err(|e| CliError::Server(e.to_string()))?;

        output.success("Server stopped");
        Ok(())
    }
}
