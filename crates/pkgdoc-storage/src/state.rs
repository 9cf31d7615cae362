//! Durable fetch state.
//!
//! [`ModuleVersionState`] mirrors one fetch task so that orchestration can
//! survive process restarts. The status column holds an HTTP-style code:
//!
//! | Status | Meaning |
//! |--------|---------|
//! | none   | scheduled, not finished |
//! | 200    | fetched and stored |
//! | 503    | failed, will be retried |
//! | 404    | module version does not exist |
//! | 422    | malformed artifact, never retried |
//! | 500    | retries exhausted |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::StorageError;

/// Fetched and stored.
pub const STATUS_OK: u16 = 200;
/// Module version does not exist upstream.
pub const STATUS_NOT_FOUND: u16 = 404;
/// Malformed artifact.
pub const STATUS_MALFORMED: u16 = 422;
/// Retries exhausted.
pub const STATUS_FAILED: u16 = 500;
/// Failed, eligible for retry after backoff.
pub const STATUS_RETRY: u16 = 503;

/// Durable record of one module version's fetch state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleVersionState {
    /// Module path.
    pub module_path: String,
    /// Requested version string.
    pub version: String,
    /// Most recent outcome, `None` until the first attempt finishes.
    pub status: Option<u16>,
    /// Most recent error message.
    pub error: Option<String>,
    /// Number of attempts made.
    pub try_count: u32,
    /// When the record was first written.
    pub created_at: DateTime<Utc>,
    /// When the last attempt finished.
    pub last_processed_at: Option<DateTime<Utc>>,
    /// Earliest time the next attempt may start.
    pub next_processed_after: DateTime<Utc>,
}

impl ModuleVersionState {
    /// A fresh record for a newly scheduled key.
    pub fn new(module_path: impl Into<String>, version: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            module_path: module_path.into(),
            version: version.into(),
            status: None,
            error: None,
            try_count: 0,
            created_at: now,
            last_processed_at: None,
            next_processed_after: now,
        }
    }
}

/// Persistence for [`ModuleVersionState`] records.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load every stored record.
    async fn load_all(&self) -> Result<Vec<ModuleVersionState>, StorageError>;

    /// Insert or replace the record for `(module_path, version)`.
    ///
    /// `created_at` of an existing record is preserved.
    async fn upsert(&self, state: &ModuleVersionState) -> Result<(), StorageError>;
}

/// State store that persists nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStateStore;

#[async_trait]
impl StateStore for NullStateStore {
    async fn load_all(&self) -> Result<Vec<ModuleVersionState>, StorageError> {
        Ok(Vec::new())
    }

    async fn upsert(&self, _state: &ModuleVersionState) -> Result<(), StorageError> {
        Ok(())
    }
}
