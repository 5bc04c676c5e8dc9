//! Edit engine error types.

use thiserror::Error;

use crate::change::{ChangeKind, Identity};

/// Change tracking and application errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    /// Table is not part of the current dataset snapshot
    #[error("Table '{table}' not found in dataset")]
    UnknownTable { table: String },

    /// An incompatible pending change already exists at this identity
    #[error("Change {identity} conflicts with pending {existing} change")]
    ChangeConflict {
        identity: Identity,
        existing: ChangeKind,
    },

    /// Parent change of a related change is not pending
    #[error("Parent change {parent} not found")]
    ParentNotFound { parent: Identity },

    /// Attaching the child would make it its own ancestor
    #[error("Attaching {child} under {parent} would create a dependency cycle")]
    DependencyCycle { parent: Identity, child: Identity },

    /// No pending change with this identity
    #[error("Change {identity} not found")]
    ChangeNotFound { identity: Identity },

    /// Dataset snapshot has not been published yet
    #[error("Dataset not available")]
    DatasetUnavailable,

    /// Work submitted after the executor began shutting down
    #[error("Task executor is shut down")]
    ExecutorShutdown,

    /// Worker thread could not be spawned
    #[error("Failed to spawn worker: {0}")]
    WorkerSpawn(String),

    /// Submitted work panicked
    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    /// Task result channel closed without a result
    #[error("Task abandoned before producing a result")]
    TaskAbandoned,

    /// A change application request is already running
    #[error("Change application already in flight")]
    ApplicationInFlight,

    /// One-shot value published twice
    #[error("{0} already published")]
    AlreadyPublished(&'static str),

    /// Backing store collaborator failure
    #[error("Backing store error: {0}")]
    BackingStore(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
