//! `SQLite`-backed [`StateStore`].
//!
//! Schema changes are applied through a version table: each migration is a
//! SQL batch applied once, in order.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};

use crate::state::{ModuleVersionState, StateStore};
use crate::storage::{ErrorStatus, StorageError, StorageErrorKind};

const BACKEND: &str = "Sqlite";

/// Migration list: (version, SQL).
const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    include_str!("../migrations/001_module_version_states.sql"),
)];

/// Durable [`StateStore`] backed by a `SQLite` file.
#[derive(Debug, Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Open (creating if missing) the database at `path` and apply pending
    /// migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(sqlx_error)?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "Opened state store");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(sqlx_error)?;

        let current: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM _migrations")
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error)?;

        for &(version, sql) in MIGRATIONS {
            if version > current {
                sqlx::raw_sql(sql)
                    .execute(&self.pool)
                    .await
                    .map_err(sqlx_error)?;
                sqlx::query("INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)")
                    .bind(version)
                    .bind(Utc::now())
                    .execute(&self.pool)
                    .await
                    .map_err(sqlx_error)?;
                tracing::info!(version, "Applied state store migration");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load_all(&self) -> Result<Vec<ModuleVersionState>, StorageError> {
        let rows = sqlx::query(
            "SELECT module_path, version, status, error, try_count,
                    created_at, last_processed_at, next_processed_after
             FROM module_version_states
             ORDER BY created_at, module_path, version",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error)?;

        rows.iter()
            .map(|row| decode_row(row).map_err(sqlx_error))
            .collect()
    }

    async fn upsert(&self, state: &ModuleVersionState) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO module_version_states (
                module_path, version, status, error, try_count,
                created_at, last_processed_at, next_processed_after
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (module_path, version) DO UPDATE SET
                status = excluded.status,
                error = excluded.error,
                try_count = excluded.try_count,
                last_processed_at = excluded.last_processed_at,
                next_processed_after = excluded.next_processed_after",
        )
        .bind(&state.module_path)
        .bind(&state.version)
        .bind(state.status.map(i64::from))
        .bind(state.error.as_deref())
        .bind(i64::from(state.try_count))
        .bind(state.created_at)
        .bind(state.last_processed_at)
        .bind(state.next_processed_after)
        .execute(&self.pool)
        .await
        .map_err(|e| sqlx_error(e).with_path(state.module_path.clone()))?;
        Ok(())
    }
}

fn decode_row(row: &SqliteRow) -> Result<ModuleVersionState, sqlx::Error> {
    let status: Option<i64> = row.try_get("status")?;
    let try_count: i64 = row.try_get("try_count")?;
    Ok(ModuleVersionState {
        module_path: row.try_get("module_path")?,
        version: row.try_get("version")?,
        status: status
            .map(u16::try_from)
            .transpose()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        error: row.try_get("error")?,
        try_count: u32::try_from(try_count).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        created_at: row.try_get("created_at")?,
        last_processed_at: row.try_get("last_processed_at")?,
        next_processed_after: row.try_get("next_processed_after")?,
    })
}

fn sqlx_error(err: sqlx::Error) -> StorageError {
    let (kind, status) = match &err {
        sqlx::Error::RowNotFound => (StorageErrorKind::NotFound, ErrorStatus::Permanent),
        sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => {
            (StorageErrorKind::InvalidData, ErrorStatus::Permanent)
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            (StorageErrorKind::Unavailable, ErrorStatus::Persistent)
        }
        _ => (StorageErrorKind::Other, ErrorStatus::Permanent),
    };
    StorageError::new(kind)
        .with_status(status)
        .with_backend(BACKEND)
        .with_source(err)
}
