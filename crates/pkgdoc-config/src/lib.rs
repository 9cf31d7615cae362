//! Configuration management for pkgdoc.
//!
//! Parses `pkgdoc.toml` with serde and discovers it in the current directory
//! or its parents. CLI settings are applied on top via [`CliSettings`].
//!
//! ## Environment Variable Expansion
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! Expanded fields:
//! - `server.host`
//! - `fetch.proxy_url`

mod expand;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "pkgdoc.toml";

/// CLI settings that override configuration file values.
///
/// Only non-None values override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override server host.
    pub host: Option<String>,
    /// Override server port.
    pub port: Option<u16>,
    /// Override fetch worker count.
    pub workers: Option<usize>,
    /// Override module proxy URL.
    pub proxy_url: Option<String>,
    /// Override state database path.
    pub state_db: Option<PathBuf>,
}

/// Application configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Background fetch configuration.
    pub fetch: FetchConfig,
    /// Cache TTLs per cache class.
    pub cache: CacheConfig,
    /// Path handling tables.
    pub paths: PathsConfig,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

/// Server configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8080,
        }
    }
}

/// Background fetch configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Worker pool size.
    pub workers: usize,
    /// Attempts before a transient failure becomes permanent.
    pub max_attempts: u32,
    /// Backoff after the first failure, in seconds.
    pub initial_backoff_secs: u64,
    /// Backoff cap, in seconds.
    pub max_backoff_secs: u64,
    /// Deadline for one attempt, in seconds.
    pub task_timeout_secs: u64,
    /// Module proxy base URL.
    pub proxy_url: String,
    /// SQLite file mirroring fetch state. Relative paths resolve against the
    /// config file's directory. No durable state when unset.
    pub state_db: Option<PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 5,
            initial_backoff_secs: 30,
            max_backoff_secs: 3600,
            task_timeout_secs: 300,
            proxy_url: "https://proxy.golang.org".to_owned(),
            state_db: None,
        }
    }
}

impl FetchConfig {
    /// Backoff after the first failure.
    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_secs(self.initial_backoff_secs)
    }

    /// Backoff cap.
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    /// Deadline for one attempt.
    #[must_use]
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Cache TTLs in seconds.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Responses to automated agents.
    pub tiny_secs: u64,
    /// Unversioned pages.
    pub short_secs: u64,
    /// Pages aggregating several versions.
    pub default_secs: u64,
    /// Versioned pages.
    pub long_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tiny_secs: 60,
            short_secs: 600,
            default_secs: 3600,
            long_secs: 86400,
        }
    }
}

/// Path handling tables.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Path prefixes that are never served or fetched.
    pub excluded: Vec<String>,
    /// Experiments enabled for every request.
    pub experiments: Vec<String>,
    /// Extra shortcut names, merged over the built-in table.
    pub shortcuts: BTreeMap<String, String>,
    /// Extra top-level aliases, merged over the built-in table.
    pub aliases: BTreeMap<String, String>,
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`fetch.proxy_url`").
        field: String,
        /// Error message (e.g., "${`GOPROXY`} not set").
        message: String,
    },
}

fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

fn require_http_url(url: &str, field: &str) -> Result<(), ConfigError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{field} must start with http:// or https://"
        )));
    }
    Ok(())
}

fn require_positive(value: u64, field: &str) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Validation(format!(
            "{field} must be greater than 0"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file. Otherwise searches
    /// for `pkgdoc.toml` in the current directory and its parents, falling
    /// back to defaults.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit `config_path` doesn't exist, parsing
    /// fails, or the resulting configuration is invalid.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default()
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
            config.validate()?;
        }

        Ok(config)
    }

    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(host) = &settings.host {
            self.server.host.clone_from(host);
        }
        if let Some(port) = settings.port {
            self.server.port = port;
        }
        if let Some(workers) = settings.workers {
            self.fetch.workers = workers;
        }
        if let Some(proxy_url) = &settings.proxy_url {
            self.fetch.proxy_url.clone_from(proxy_url);
        }
        if let Some(state_db) = &settings.state_db {
            self.fetch.state_db = Some(state_db.clone());
        }
    }

    /// Search for config file in current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        config.expand_env_vars()?;
        config.resolve_paths(path.parent().unwrap_or(Path::new(".")));
        config.config_path = Some(path.to_path_buf());
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_fetch()?;
        self.validate_cache()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.server.host, "server.host")?;
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server.port cannot be 0".to_owned(),
            ));
        }
        Ok(())
    }

    fn validate_fetch(&self) -> Result<(), ConfigError> {
        let fetch = &self.fetch;
        if fetch.workers == 0 {
            return Err(ConfigError::Validation(
                "fetch.workers must be at least 1".to_owned(),
            ));
        }
        if fetch.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "fetch.max_attempts must be at least 1".to_owned(),
            ));
        }
        require_positive(fetch.task_timeout_secs, "fetch.task_timeout_secs")?;
        if fetch.max_backoff_secs < fetch.initial_backoff_secs {
            return Err(ConfigError::Validation(
                "fetch.max_backoff_secs cannot be less than fetch.initial_backoff_secs".to_owned(),
            ));
        }
        require_non_empty(&fetch.proxy_url, "fetch.proxy_url")?;
        require_http_url(&fetch.proxy_url, "fetch.proxy_url")?;
        Ok(())
    }

    fn validate_cache(&self) -> Result<(), ConfigError> {
        let cache = &self.cache;
        require_positive(cache.tiny_secs, "cache.tiny_secs")?;
        let ordered = cache.tiny_secs < cache.short_secs
            && cache.short_secs < cache.default_secs
            && cache.default_secs < cache.long_secs;
        if !ordered {
            return Err(ConfigError::Validation(
                "cache TTLs must increase: tiny_secs < short_secs < default_secs < long_secs"
                    .to_owned(),
            ));
        }
        Ok(())
    }

    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        self.server.host = expand::expand_env(&self.server.host, "server.host")?;
        self.fetch.proxy_url = expand::expand_env(&self.fetch.proxy_url, "fetch.proxy_url")?;
        Ok(())
    }

    /// Resolve relative paths against the config file's directory.
    fn resolve_paths(&mut self, config_dir: &Path) {
        if let Some(state_db) = &self.fetch.state_db
            && state_db.is_relative()
        {
            self.fetch.state_db = Some(config_dir.join(state_db));
        }
    }
}
