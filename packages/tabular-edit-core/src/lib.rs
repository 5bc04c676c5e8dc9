//! Core change tracking engine for offline table edits.
//!
//! Provides the change record and its content-addressed identity, the
//! published dataset snapshot, the pending change store with conflict
//! resolution, dependency tracking, and the freeze barrier.

pub mod change;
pub mod config;
pub mod dataset;
pub mod error;
pub mod store;

pub use change::{CellMap, ChangeKind, ChangeRecord, Identity};
pub use dataset::{ColumnHeader, ColumnKind, DatasetHandle, DatasetSnapshot, DatasetValidator, TableData};
pub use error::EditError;
pub use store::{AddOutcome, ChangeStore, FreezeGuard, StoreSnapshot};
