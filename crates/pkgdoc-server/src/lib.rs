//! HTTP server for pkgdoc.
//!
//! Serves module and package details over axum:
//! - `GET /<path>[@<version>][/<suffix>]` answers with a JSON summary of the
//!   resolved unit, a redirect, or an error
//! - `?tab=versions&m=json` lists the known versions of the module
//!
//! Unknown module versions are never fetched inline. The request schedules a
//! background fetch and answers `404` at once; a later request sees the
//! result.
//!
//! # Architecture
//!
//! ```text
//! Client ──HTTP──► axum router (pkgdoc-server)
//!                      │
//!                      ├─► Redirector ──► 301/302
//!                      ├─► PathResolver ──► DataSource (module index)
//!                      ├─► CachePolicy ──► Cache-Control
//!                      └─► Orchestrator ──► ProxyFetcher ──► module proxy
//!                                │
//!                                └─► StateStore (SQLite mirror)
//! ```

mod app;
mod error;
mod handlers;
mod middleware;
mod state;

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use pkgdoc_config::Config;
use pkgdoc_fetch::{
    ExperimentSet, FetchConfig, FetchKey, Orchestrator, ProxyFetcher, SystemClock,
};
use pkgdoc_module::Version;
use pkgdoc_storage::{DataSource, MemoryDataSource, NullStateStore, SqliteStateStore, StateStore};
use state::AppState;

/// Run the server until Ctrl-C.
///
/// Opens the durable state store (if configured), restores the fetch state
/// from it, and serves on the configured address. Running fetches are
/// cancelled on shutdown.
///
/// # Errors
///
/// Returns an error if the state store cannot be opened or the server fails
/// to start.
pub async fn run_server(config: &Config, version: &str) -> Result<(), Box<dyn std::error::Error>> {
    let data_source: Arc<dyn DataSource> = Arc::new(MemoryDataSource::new());

    let store: Arc<dyn StateStore> = match &config.fetch.state_db {
        Some(path) => Arc::new(SqliteStateStore::open(path).await?),
        None => Arc::new(NullStateStore),
    };

    let fetcher = ProxyFetcher::new(&config.fetch.proxy_url, Arc::clone(&data_source));
    let orchestrator = Orchestrator::start(
        fetch_config(&config.fetch),
        Arc::new(fetcher),
        store,
        Arc::new(SystemClock),
    );

    let experiments = ExperimentSet::new(config.paths.experiments.iter().cloned());
    orchestrator
        .restore(&experiments, |key| is_present(data_source.as_ref(), key))
        .await?;

    let state = Arc::new(AppState::new(
        config,
        Arc::clone(&data_source),
        orchestrator.clone(),
    ));
    let app = app::create_router(state);

    let addr = SocketAddr::from_str(&format!("{}:{}", config.server.host, config.server.port))?;
    tracing::info!(address = %addr, version, proxy = %config.fetch.proxy_url, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.shutdown();
    Ok(())
}

/// Orchestrator settings from the `[fetch]` section.
fn fetch_config(config: &pkgdoc_config::FetchConfig) -> FetchConfig {
    FetchConfig {
        workers: config.workers,
        max_attempts: config.max_attempts,
        initial_backoff: config.initial_backoff(),
        max_backoff: config.max_backoff(),
        task_timeout: config.task_timeout(),
    }
}

/// Whether the data behind a fetch key is in the index.
fn is_present(data_source: &dyn DataSource, key: &FetchKey) -> bool {
    Version::parse(&key.version)
        .ok()
        .and_then(|version| data_source.module_info(&key.module_path, &version).ok())
        .flatten()
        .is_some()
}

/// Wait for shutdown signal (Ctrl-C).
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping server...");
}
