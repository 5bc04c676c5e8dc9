//! Per-table lookup indices derived from the flat change map.

use std::collections::{BTreeMap, HashMap};

use crate::change::{ChangeRecord, Identity};

/// Row id and unique key indices for one table.
#[derive(Debug, Default, Clone)]
pub(crate) struct TableIndex {
    /// Row id to identities of pending changes targeting that row
    pub(crate) by_row: BTreeMap<i64, Vec<Identity>>,
    /// (column, value) of uniqueness-constrained columns to the identities
    /// carrying it, in indexing order
    by_unique: HashMap<(String, String), Vec<Identity>>,
}

impl TableIndex {
    /// Indexes a newly stored record.
    pub(crate) fn insert(&mut self, record: &ChangeRecord, unique_columns: &[String]) {
        let ids = self.by_row.entry(record.row_id()).or_default();
        if !ids.contains(&record.identity()) {
            ids.push(record.identity());
        }
        self.index_unique(record, unique_columns);
    }

    /// Re-indexes unique values after a cell merge.
    pub(crate) fn reindex(&mut self, record: &ChangeRecord, unique_columns: &[String]) {
        self.unindex_unique(record.identity());
        self.index_unique(record, unique_columns);
    }

    /// Drops every entry pointing at the record.
    pub(crate) fn remove(&mut self, record: &ChangeRecord) {
        let identity = record.identity();
        if let Some(ids) = self.by_row.get_mut(&record.row_id()) {
            ids.retain(|id| *id != identity);
            if ids.is_empty() {
                self.by_row.remove(&record.row_id());
            }
        }
        self.unindex_unique(identity);
    }

    pub(crate) fn row(&self, row_id: i64) -> &[Identity] {
        self.by_row.get(&row_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns the earliest indexed pending holder of a unique value.
    pub(crate) fn unique(&self, column: &str, value: &str) -> Option<Identity> {
        self.by_unique
            .get(&(column.to_string(), value.to_string()))
            .and_then(|ids| ids.first())
            .copied()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_row.is_empty() && self.by_unique.is_empty()
    }

    fn index_unique(&mut self, record: &ChangeRecord, unique_columns: &[String]) {
        for column in unique_columns {
            if let Some(value) = record.cells().get(column) {
                let ids = self
                    .by_unique
                    .entry((column.clone(), value.clone()))
                    .or_default();
                if !ids.contains(&record.identity()) {
                    ids.push(record.identity());
                }
            }
        }
    }

    fn unindex_unique(&mut self, identity: Identity) {
        self.by_unique.retain(|_, ids| {
            ids.retain(|id| *id != identity);
            !ids.is_empty()
        });
    }
}
