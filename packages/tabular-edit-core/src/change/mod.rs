//! Pending mutation records.

mod identity;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dataset::DatasetValidator;

pub use identity::Identity;

/// Column name to new value.
pub type CellMap = BTreeMap<String, String>;

/// Kind of row mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Create a new row
    InsertRow,
    /// Remove an existing row
    DeleteRow,
    /// Overwrite cells of an existing row
    UpdateCells,
}

impl ChangeKind {
    /// Stable per-kind component for identity hashing.
    pub(crate) fn component_hash(self) -> u64 {
        match self {
            ChangeKind::InsertRow => 0,
            ChangeKind::DeleteRow => 1,
            ChangeKind::UpdateCells => 2,
        }
    }

    /// Returns true for kinds that create or destroy a row and can never be merged.
    pub fn is_structural(self) -> bool {
        matches!(self, ChangeKind::InsertRow | ChangeKind::DeleteRow)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::InsertRow => "insert",
            ChangeKind::DeleteRow => "delete",
            ChangeKind::UpdateCells => "update",
        };
        f.write_str(name)
    }
}

/// One pending mutation against a row.
///
/// The identity is fixed at construction from `(kind, table, row_id)`;
/// cell edits never change it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ChangeFields")]
pub struct ChangeRecord {
    kind: ChangeKind,
    table: String,
    row_id: i64,
    cells: CellMap,
    identity: Identity,
    selected: bool,
}

/// Deserialization shape; the identity is always recomputed.
#[derive(Deserialize)]
struct ChangeFields {
    kind: ChangeKind,
    table: String,
    row_id: i64,
    #[serde(default)]
    cells: CellMap,
    #[serde(default)]
    selected: bool,
}

impl From<ChangeFields> for ChangeRecord {
    fn from(fields: ChangeFields) -> Self {
        let mut record = ChangeRecord::new(fields.kind, fields.table, fields.row_id, fields.cells);
        record.selected = fields.selected;
        record
    }
}

impl ChangeRecord {
    /// Creates a new change record.
    ///
    /// # Arguments
    /// * `kind` - Mutation kind
    /// * `table` - Target table name
    /// * `row_id` - Target row id
    /// * `cells` - Column values carried by the change
    pub fn new(kind: ChangeKind, table: impl Into<String>, row_id: i64, cells: CellMap) -> Self {
        let table = table.into();
        let identity = Identity::of(kind, &table, row_id);
        Self {
            kind,
            table,
            row_id,
            cells,
            identity,
            selected: false,
        }
    }

    /// Creates a row insertion with no cell values.
    pub fn insert_row(table: impl Into<String>, row_id: i64) -> Self {
        Self::new(ChangeKind::InsertRow, table, row_id, CellMap::new())
    }

    /// Creates a row deletion.
    pub fn delete_row(table: impl Into<String>, row_id: i64) -> Self {
        Self::new(ChangeKind::DeleteRow, table, row_id, CellMap::new())
    }

    /// Creates a cell update.
    pub fn update_cells(table: impl Into<String>, row_id: i64, cells: CellMap) -> Self {
        Self::new(ChangeKind::UpdateCells, table, row_id, cells)
    }

    /// Adds or replaces one cell value.
    pub fn with_cell(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.cells.insert(column.into(), value.into());
        self
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn row_id(&self) -> i64 {
        self.row_id
    }

    pub fn cells(&self) -> &CellMap {
        &self.cells
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// Returns whether the target table exists in the current dataset.
    pub fn is_valid(&self, dataset: &dyn DatasetValidator) -> bool {
        dataset.table_exists(&self.table)
    }

    pub(crate) fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    pub(crate) fn into_cells(self) -> CellMap {
        self.cells
    }

    /// Overwrites or adds every column of `incoming`; other columns are kept.
    pub(crate) fn merge_cells(&mut self, incoming: CellMap) {
        self.cells.extend(incoming);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_cells() {
        let a = ChangeRecord::update_cells("categories", 0, CellMap::new());
        let b = ChangeRecord::update_cells("categories", 0, CellMap::new()).with_cell("test", "2");
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_kind_changes_identity() {
        let insert = ChangeRecord::insert_row("categories", 0);
        let update = ChangeRecord::update_cells("categories", 0, CellMap::new());
        assert_ne!(insert.identity(), update.identity());
    }

    #[test]
    fn test_merge_cells_last_write_wins() {
        let mut record = ChangeRecord::update_cells("t", 1, CellMap::new()).with_cell("a", "1");
        let before = record.identity();
        record.merge_cells(CellMap::from([
            ("a".to_string(), "2".to_string()),
            ("b".to_string(), "3".to_string()),
        ]));
        assert_eq!(record.cells().get("a").map(String::as_str), Some("2"));
        assert_eq!(record.cells().get("b").map(String::as_str), Some("3"));
        assert_eq!(record.identity(), before);
    }

    #[test]
    fn test_deserialize_recomputes_identity() {
        let json = r#"{"kind":"UpdateCells","table":"categories","row_id":3,"cells":{"name":"x"},"identity":1}"#;
        let record: ChangeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(
            record.identity(),
            Identity::of(ChangeKind::UpdateCells, "categories", 3)
        );
        assert!(!record.is_selected());
    }

    #[test]
    fn test_structural_kinds() {
        assert!(ChangeKind::InsertRow.is_structural());
        assert!(ChangeKind::DeleteRow.is_structural());
        assert!(!ChangeKind::UpdateCells.is_structural());
    }
}
