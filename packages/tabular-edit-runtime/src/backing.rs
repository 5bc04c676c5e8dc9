//! Backing store collaborator interface.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tabular_edit_core::{ChangeRecord, ColumnHeader, Identity};

use crate::Result;

/// What the backing store should do with a submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyAction {
    /// Durably apply the changes
    Execute,
    /// Check which changes would apply, without mutating anything
    ValidateOnly,
}

/// Durable store the dataset is read from and changes are committed to.
///
/// Wire protocol and query language are the implementor's concern.
pub trait BackingStore: Send + Sync {
    /// Lists the tables of the dataset.
    fn fetch_table_names(&self) -> Result<Vec<String>>;

    /// Returns the column headers of a table.
    fn fetch_headers(&self, table: &str) -> Result<Vec<ColumnHeader>>;

    /// Returns every row's value for one column, in row order.
    fn fetch_column(&self, table: &str, column: &str) -> Result<Vec<String>>;

    /// Applies an ordered batch of changes.
    ///
    /// # Arguments
    /// * `changes` - Changes in application order; prerequisites come first
    /// * `action` - Execute or validate only
    ///
    /// # Returns
    /// Identities of the changes that applied (or would apply) successfully.
    fn apply_changes(
        &self,
        changes: &[ChangeRecord],
        action: ApplyAction,
    ) -> Result<HashSet<Identity>>;
}

/// Shared handle to a backing store.
pub type SharedBackingStore = Arc<dyn BackingStore>;
