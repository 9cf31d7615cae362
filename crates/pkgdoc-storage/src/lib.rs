//! Storage collaborators for pkgdoc.
//!
//! This crate provides:
//! - [`DataSource`] trait: the module index and storage read path consulted
//!   while resolving request paths
//! - [`MemoryDataSource`]: in-memory index used by the server and tests
//! - [`StateStore`] trait: durable mirror of fetch task state
//! - [`SqliteStateStore`] and [`NullStateStore`] implementations
//!
//! All errors are reported as [`StorageError`], which carries retry guidance
//! in its [`ErrorStatus`].

mod memory;
mod sqlite;
mod state;
mod storage;

pub use memory::MemoryDataSource;
pub use sqlite::SqliteStateStore;
pub use state::{
    ModuleVersionState, NullStateStore, STATUS_FAILED, STATUS_MALFORMED, STATUS_NOT_FOUND,
    STATUS_OK, STATUS_RETRY, StateStore,
};
pub use storage::{
    DataSource, ErrorStatus, Module, ModuleInfo, StorageError, StorageErrorKind, Unit,
};
