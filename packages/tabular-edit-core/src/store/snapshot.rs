//! Read-only copy of the store for presentation.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::change::{ChangeRecord, Identity};

/// Immutable copy of the pending changes, their row index and edges.
///
/// Taken under the store lock in one step; traversing it never blocks writers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreSnapshot {
    /// Identity to change record
    pub records: BTreeMap<Identity, ChangeRecord>,
    /// Table to row id to identities of pending changes
    pub by_row: BTreeMap<String, BTreeMap<i64, Vec<Identity>>>,
    /// Parent to children edges
    pub children: BTreeMap<Identity, Vec<Identity>>,
    /// Derived validity of each record at snapshot time
    pub validity: BTreeMap<Identity, bool>,
}

impl StoreSnapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, identity: Identity) -> Option<&ChangeRecord> {
        self.records.get(&identity)
    }

    pub fn is_valid(&self, identity: Identity) -> bool {
        self.validity.get(&identity).copied().unwrap_or(false)
    }

    /// Returns the pending changes of one row.
    pub fn row(&self, table: &str, row_id: i64) -> Vec<&ChangeRecord> {
        self.by_row
            .get(table)
            .and_then(|rows| rows.get(&row_id))
            .map(|ids| ids.iter().filter_map(|id| self.records.get(id)).collect())
            .unwrap_or_default()
    }

    /// Returns identities that are not a child of any other change.
    pub fn roots(&self) -> Vec<Identity> {
        let children: std::collections::HashSet<Identity> =
            self.children.values().flatten().copied().collect();
        self.records
            .keys()
            .filter(|id| !children.contains(id))
            .copied()
            .collect()
    }
}
