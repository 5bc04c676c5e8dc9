//! In-memory backing store.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tabular_edit_core::error::EditError;
use tabular_edit_core::{CellMap, ChangeKind, ChangeRecord, ColumnHeader, ColumnKind, Identity};

use crate::backing::{ApplyAction, BackingStore};
use crate::Result;

/// Rows of one table keyed by row id.
#[derive(Debug, Clone, Default)]
struct MemTable {
    headers: Vec<ColumnHeader>,
    rows: BTreeMap<i64, CellMap>,
}

impl MemTable {
    fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|h| h.name == column)
    }

    fn primary_key(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.kind == ColumnKind::PrimaryKey)
            .map(|h| h.name.as_str())
    }

    fn check_columns(&self, cells: &CellMap) -> std::result::Result<(), String> {
        match cells.keys().find(|c| !self.has_column(c)) {
            Some(column) => Err(format!("unknown column '{}'", column)),
            None => Ok(()),
        }
    }

    fn apply(&mut self, change: &ChangeRecord) -> std::result::Result<(), String> {
        let row_id = change.row_id();
        match change.kind() {
            ChangeKind::InsertRow => {
                if self.rows.contains_key(&row_id) {
                    return Err(format!("row {} already exists", row_id));
                }
                self.check_columns(change.cells())?;
                let mut row = change.cells().clone();
                if let Some(pk) = self.primary_key() {
                    row.insert(pk.to_string(), row_id.to_string());
                }
                self.rows.insert(row_id, row);
            }
            ChangeKind::DeleteRow => {
                if self.rows.remove(&row_id).is_none() {
                    return Err(format!("row {} not found", row_id));
                }
            }
            ChangeKind::UpdateCells => {
                self.check_columns(change.cells())?;
                let row = self
                    .rows
                    .get_mut(&row_id)
                    .ok_or_else(|| format!("row {} not found", row_id))?;
                row.extend(change.cells().clone());
            }
        }
        Ok(())
    }
}

/// Backing store holding its tables in memory.
///
/// Each change is applied independently in submission order; a failing
/// change is left out of the reported set without affecting the others.
#[derive(Debug, Default)]
pub struct InMemoryBackingStore {
    tables: RwLock<BTreeMap<String, MemTable>>,
    fail_fetches: AtomicBool,
}

impl InMemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table; rows are keyed by their primary key value or, without
    /// a primary key column, by position.
    pub fn with_table(
        self,
        name: impl Into<String>,
        headers: Vec<ColumnHeader>,
        rows: Vec<Vec<String>>,
    ) -> Self {
        let pk_index = headers.iter().position(|h| h.kind == ColumnKind::PrimaryKey);
        let mut table = MemTable {
            headers,
            rows: BTreeMap::new(),
        };
        for (position, values) in rows.into_iter().enumerate() {
            let row_id = pk_index
                .and_then(|i| values.get(i))
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(position as i64);
            let row: CellMap = table
                .headers
                .iter()
                .map(|h| h.name.clone())
                .zip(values)
                .collect();
            table.rows.insert(row_id, row);
        }
        self.tables.write().insert(name.into(), table);
        self
    }

    /// Makes every fetch fail, for exercising acquisition error paths.
    pub fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::Release);
    }

    /// Returns a copy of one row.
    pub fn row(&self, table: &str, row_id: i64) -> Option<CellMap> {
        self.tables
            .read()
            .get(table)
            .and_then(|t| t.rows.get(&row_id).cloned())
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.rows.len())
    }

    fn check_fetch(&self) -> Result<()> {
        if self.fail_fetches.load(Ordering::Acquire) {
            return Err(EditError::BackingStore("connection refused".to_string()));
        }
        Ok(())
    }

    fn missing_table(table: &str) -> EditError {
        EditError::BackingStore(format!("table '{}' does not exist", table))
    }

    fn apply_all(
        tables: &mut BTreeMap<String, MemTable>,
        changes: &[ChangeRecord],
    ) -> HashSet<Identity> {
        let mut applied = HashSet::with_capacity(changes.len());
        for change in changes {
            let outcome = match tables.get_mut(change.table()) {
                Some(table) => table.apply(change),
                None => Err(format!("table '{}' does not exist", change.table())),
            };
            match outcome {
                Ok(()) => {
                    applied.insert(change.identity());
                }
                Err(reason) => {
                    tracing::debug!("Change {} not applied: {}", change.identity(), reason);
                }
            }
        }
        applied
    }
}

impl BackingStore for InMemoryBackingStore {
    fn fetch_table_names(&self) -> Result<Vec<String>> {
        self.check_fetch()?;
        Ok(self.tables.read().keys().cloned().collect())
    }

    fn fetch_headers(&self, table: &str) -> Result<Vec<ColumnHeader>> {
        self.check_fetch()?;
        self.tables
            .read()
            .get(table)
            .map(|t| t.headers.clone())
            .ok_or_else(|| Self::missing_table(table))
    }

    fn fetch_column(&self, table: &str, column: &str) -> Result<Vec<String>> {
        self.check_fetch()?;
        let tables = self.tables.read();
        let data = tables.get(table).ok_or_else(|| Self::missing_table(table))?;
        if !data.has_column(column) {
            return Err(EditError::BackingStore(format!(
                "column '{}' does not exist in '{}'",
                column, table
            )));
        }
        Ok(data
            .rows
            .values()
            .map(|row| row.get(column).cloned().unwrap_or_default())
            .collect())
    }

    fn apply_changes(
        &self,
        changes: &[ChangeRecord],
        action: ApplyAction,
    ) -> Result<HashSet<Identity>> {
        match action {
            ApplyAction::Execute => {
                let mut tables = self.tables.write();
                Ok(Self::apply_all(&mut tables, changes))
            }
            ApplyAction::ValidateOnly => {
                let mut scratch = self.tables.read().clone();
                Ok(Self::apply_all(&mut scratch, changes))
            }
        }
    }
}
