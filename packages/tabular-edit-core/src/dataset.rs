//! Immutable dataset snapshot and its atomically published handle.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};

/// Role of a column in its table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    /// Primary key column
    PrimaryKey,
    /// Reference to a column of another table
    ForeignKey { table: String, column: String },
    /// Column with a uniqueness constraint
    UniqueKey,
    /// Plain column
    Plain,
}

/// Column header as reported by the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnHeader {
    /// Column name
    pub name: String,
    /// Column role
    pub kind: ColumnKind,
}

impl ColumnHeader {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn plain(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Plain)
    }
}

/// Headers and row values of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableData {
    /// Column headers in backing store order
    pub headers: Vec<ColumnHeader>,
    /// Row values, one entry per header
    pub rows: Vec<Vec<String>>,
    /// Highest allocated primary key, once derived
    pub max_primary_key: Option<i64>,
}

impl TableData {
    /// Creates table data without a derived primary key maximum.
    pub fn new(headers: Vec<ColumnHeader>, rows: Vec<Vec<String>>) -> Self {
        Self {
            headers,
            rows,
            max_primary_key: None,
        }
    }

    /// Returns the position of a column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.name == name)
    }

    /// Returns the position of the primary key column.
    pub fn primary_key_index(&self) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.kind == ColumnKind::PrimaryKey)
    }

    /// Computes the highest integer primary key among the rows.
    ///
    /// Non-integer key values are ignored. Returns `None` when the table
    /// has no primary key column or no integer keys.
    pub fn compute_max_primary_key(&self) -> Option<i64> {
        let index = self.primary_key_index()?;
        self.rows
            .iter()
            .filter_map(|row| row.get(index))
            .filter_map(|value| value.trim().parse::<i64>().ok())
            .max()
    }

    /// Returns names of columns carrying a uniqueness constraint.
    pub fn unique_columns(&self) -> Vec<String> {
        self.headers
            .iter()
            .filter(|h| h.kind == ColumnKind::UniqueKey)
            .map(|h| h.name.clone())
            .collect()
    }
}

/// Tables, headers and rows as last fetched from the backing store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    /// Table name to table data
    pub tables: BTreeMap<String, TableData>,
}

impl DatasetSnapshot {
    pub fn new(tables: BTreeMap<String, TableData>) -> Self {
        Self { tables }
    }

    pub fn table(&self, name: &str) -> Option<&TableData> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }
}

/// Read access to the dataset that pending changes are validated against.
pub trait DatasetValidator: Send + Sync {
    /// Returns whether the table exists in the current dataset.
    fn table_exists(&self, table: &str) -> bool;

    /// Returns the highest allocated primary key of a table.
    fn max_primary_key(&self, table: &str) -> Option<i64>;

    /// Returns the uniqueness-constrained columns of a table.
    fn unique_columns(&self, table: &str) -> Vec<String>;
}

impl DatasetValidator for DatasetSnapshot {
    fn table_exists(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    fn max_primary_key(&self, table: &str) -> Option<i64> {
        self.table(table).and_then(|t| t.max_primary_key)
    }

    fn unique_columns(&self, table: &str) -> Vec<String> {
        self.table(table)
            .map(TableData::unique_columns)
            .unwrap_or_default()
    }
}

/// Shared slot holding the most recently published dataset snapshot.
///
/// Readers never block; publication swaps the snapshot atomically.
#[derive(Debug, Default)]
pub struct DatasetHandle {
    current: ArcSwapOption<DatasetSnapshot>,
    available: AtomicBool,
}

impl DatasetHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a new snapshot and marks the dataset available.
    pub fn publish(&self, snapshot: Arc<DatasetSnapshot>) {
        tracing::debug!(
            "Publishing dataset snapshot with {} tables",
            snapshot.tables.len()
        );
        self.current.store(Some(snapshot));
        self.available.store(true, Ordering::Release);
    }

    /// Returns whether a snapshot has been published.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Returns the current snapshot, if published.
    pub fn snapshot(&self) -> Option<Arc<DatasetSnapshot>> {
        self.current.load_full()
    }
}

impl DatasetHandle {
    fn with_snapshot<R>(&self, f: impl FnOnce(&DatasetSnapshot) -> R) -> Option<R> {
        let guard = self.current.load();
        (*guard).as_ref().map(|snapshot| f(snapshot))
    }
}

impl DatasetValidator for DatasetHandle {
    fn table_exists(&self, table: &str) -> bool {
        self.with_snapshot(|s| s.table_exists(table))
            .unwrap_or(false)
    }

    fn max_primary_key(&self, table: &str) -> Option<i64> {
        self.with_snapshot(|s| s.max_primary_key(table)).flatten()
    }

    fn unique_columns(&self, table: &str) -> Vec<String> {
        self.with_snapshot(|s| s.unique_columns(table))
            .unwrap_or_default()
    }
}
