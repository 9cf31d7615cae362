//! Data source trait, module metadata and error types.
//!
//! The [`DataSource`] trait is the lookup collaborator used while resolving
//! request paths: it answers which module paths are known, which versions
//! they have published, and which units (packages or directories) exist in a
//! given module version.

use chrono::{DateTime, Utc};
use pkgdoc_module::{Candidate, Version};
use serde::Serialize;

/// Metadata for one published module version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfo {
    /// Module path, e.g. `github.com/foo/bar`.
    pub module_path: String,
    /// Concrete version (never `latest` or `master`).
    pub version: Version,
    /// Commit time of the version.
    pub commit_time: DateTime<Utc>,
    /// Whether the module's content may be displayed.
    pub is_redistributable: bool,
    /// Whether the module version has a `go.mod` file.
    pub has_go_mod: bool,
}

impl ModuleInfo {
    /// Create redistributable module metadata with a `go.mod` file.
    pub fn new(module_path: impl Into<String>, version: Version, commit_time: DateTime<Utc>) -> Self {
        Self {
            module_path: module_path.into(),
            version,
            commit_time,
            is_redistributable: true,
            has_go_mod: true,
        }
    }
}

impl Candidate for ModuleInfo {
    fn version(&self) -> &Version {
        &self.version
    }

    fn is_redistributable(&self) -> bool {
        self.is_redistributable
    }
}

/// A package or directory inside a module version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    /// Full import path of the unit.
    pub path: String,
    /// Last element of the path.
    pub name: String,
    /// Whether the unit's content may be displayed.
    pub is_redistributable: bool,
}

impl Unit {
    /// Create a redistributable unit named after its last path element.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or_default().to_owned();
        Self {
            path,
            name,
            is_redistributable: true,
        }
    }
}

/// A module version with its units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Module metadata.
    pub info: ModuleInfo,
    /// Units contained in the module.
    pub units: Vec<Unit>,
}

impl Module {
    /// Create a module with no units.
    pub fn new(info: ModuleInfo) -> Self {
        Self {
            info,
            units: Vec::new(),
        }
    }

    /// Add a unit by path.
    #[must_use]
    pub fn with_unit(mut self, path: impl Into<String>) -> Self {
        self.units.push(Unit::new(path));
        self
    }
}

/// Semantic error categories.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum StorageErrorKind {
    /// Record does not exist.
    NotFound,
    /// Stored data could not be decoded.
    InvalidData,
    /// Backend is temporarily unavailable.
    Unavailable,
    /// Other/unknown error category.
    Other,
}

/// Retry guidance.
#[derive(Debug, PartialEq, Eq, Default)]
pub enum ErrorStatus {
    /// Don't retry (not found, corrupt data).
    #[default]
    Permanent,
    /// Retry immediately (timeout, connection reset).
    Temporary,
    /// Retry with backoff (database locked, pool exhausted).
    Persistent,
}

/// Storage error with semantic kind and backend-specific source.
#[derive(Debug)]
pub struct StorageError {
    /// Semantic error category.
    pub kind: StorageErrorKind,
    /// Retry guidance.
    pub status: ErrorStatus,
    /// Module path context (if applicable).
    pub path: Option<String>,
    /// Backend identifier (e.g., "Memory", "Sqlite").
    pub backend: Option<&'static str>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StorageError {
    /// Create a new storage error.
    #[must_use]
    pub fn new(kind: StorageErrorKind) -> Self {
        Self {
            kind,
            status: ErrorStatus::Permanent,
            path: None,
            backend: None,
            source: None,
        }
    }

    /// Attach module path context.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attach backend identifier.
    #[must_use]
    pub fn with_backend(mut self, backend: &'static str) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set retry status.
    #[must_use]
    pub fn with_status(mut self, status: ErrorStatus) -> Self {
        self.status = status;
        self
    }

    /// Attach the underlying error source.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Whether retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        self.status != ErrorStatus::Permanent
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Format: "[Backend] Kind: message (path: github.com/foo/bar)"
        if let Some(backend) = self.backend {
            write!(f, "[{backend}] ")?;
        }

        let kind_str = match self.kind {
            StorageErrorKind::NotFound => "Not found",
            StorageErrorKind::InvalidData => "Invalid data",
            StorageErrorKind::Unavailable => "Unavailable",
            StorageErrorKind::Other => "Error",
        };

        write!(f, "{kind_str}")?;

        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }

        if let Some(path) = &self.path {
            write!(f, " (path: {path})")?;
        }

        Ok(())
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Module index and storage read path.
///
/// Implementations must be safe to share between request handlers and fetch
/// workers.
pub trait DataSource: Send + Sync {
    /// All known versions of a module, in no particular order.
    ///
    /// Returns an empty list for unknown modules.
    fn module_versions(&self, module_path: &str) -> Result<Vec<ModuleInfo>, StorageError>;

    /// Known module paths in the series `series`, sorted.
    ///
    /// `series` is a path without a major-version suffix, as returned by
    /// [`pkgdoc_module::path::series_path`].
    fn series_modules(&self, series: &str) -> Result<Vec<String>, StorageError>;

    /// Whether `module_path` has published at least one known version.
    fn is_known_module(&self, module_path: &str) -> Result<bool, StorageError> {
        Ok(!self.module_versions(module_path)?.is_empty())
    }

    /// Resolve a requested version of a module to its stored metadata.
    ///
    /// `latest` picks the latest version (preferring redistributable ones);
    /// `master` follows the alias recorded when it was fetched; concrete
    /// versions must match exactly. Returns `None` when nothing matches.
    fn module_info(
        &self,
        module_path: &str,
        requested: &Version,
    ) -> Result<Option<ModuleInfo>, StorageError>;

    /// Look up a unit by full path within a stored module version.
    fn unit(&self, full_path: &str, module: &ModuleInfo) -> Result<Option<Unit>, StorageError>;

    /// Store a fetched module version.
    ///
    /// When `requested` is symbolic, it is recorded as an alias of the stored
    /// concrete version.
    fn put_module(&self, requested: &Version, module: Module) -> Result<(), StorageError>;
}
