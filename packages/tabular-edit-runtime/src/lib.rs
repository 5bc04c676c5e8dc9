//! Worker pool, dataset acquisition and batched change application.
//!
//! Everything asynchronous runs on one shared [`TaskExecutor`]: the three
//! acquisition stages, the derived primary key computation, and every
//! batch handed to the backing store.

mod backing;
mod coordinator;
mod executor;
mod handoff;
mod memory;
mod pipeline;
mod session;

pub use backing::{ApplyAction, BackingStore, SharedBackingStore};
pub use coordinator::ChangeApplicationCoordinator;
pub use executor::{TaskExecutor, TaskHandle};
pub use handoff::Handoff;
pub use memory::InMemoryBackingStore;
pub use pipeline::{DataAcquisitionPipeline, DatasetTask};
pub use session::EditSession;

use tabular_edit_core::error::EditError;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, EditError>;
