//! Thread-safe store of pending changes.
//!
//! The flat identity map is the single source of truth; the per-table
//! indices and dependency edges are derived from it and updated under the
//! same lock. Every mutation goes through this type.

mod conflict;
mod freeze;
mod graph;
mod index;
mod snapshot;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::change::{ChangeKind, ChangeRecord, Identity};
use crate::dataset::DatasetValidator;
use crate::error::EditError;

pub use conflict::{ConflictResolver, Resolution};
pub use freeze::FreezeGuard;
pub use graph::DependencyGraph;
pub use snapshot::StoreSnapshot;

use index::TableIndex;

/// How an accepted change entered the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Stored as a new record
    Inserted(Identity),
    /// Merged into the pending update with the same identity
    Merged(Identity),
}

impl AddOutcome {
    pub fn identity(self) -> Identity {
        match self {
            AddOutcome::Inserted(id) | AddOutcome::Merged(id) => id,
        }
    }

    pub fn is_inserted(self) -> bool {
        matches!(self, AddOutcome::Inserted(_))
    }
}

/// Data guarded by the store mutex.
#[derive(Debug, Default)]
struct StoreState {
    /// Set while a freeze guard is alive
    frozen: bool,
    /// Identity to pending change
    records: HashMap<Identity, ChangeRecord>,
    /// Prerequisite edges between pending changes
    graph: DependencyGraph,
    /// Table name to derived indices
    indices: HashMap<String, TableIndex>,
    /// Table name to highest allocated row id
    next_row_ids: HashMap<String, i64>,
}

impl StoreState {
    fn store_record(
        &mut self,
        record: ChangeRecord,
        resolver: &ConflictResolver,
    ) -> Result<AddOutcome, EditError> {
        let identity = record.identity();
        let resolution = resolver.resolve(self.records.get(&identity), &record)?;
        let unique_columns = resolver.dataset().unique_columns(record.table());
        let index = self.indices.entry(record.table().to_string()).or_default();

        match resolution {
            Resolution::Insert => {
                index.insert(&record, &unique_columns);
                if record.kind() == ChangeKind::InsertRow {
                    let highest = self
                        .next_row_ids
                        .entry(record.table().to_string())
                        .or_insert(record.row_id());
                    *highest = (*highest).max(record.row_id());
                }
                self.records.insert(identity, record);
                Ok(AddOutcome::Inserted(identity))
            }
            Resolution::Merge => {
                let existing = self
                    .records
                    .get_mut(&identity)
                    .ok_or(EditError::ChangeNotFound { identity })?;
                existing.merge_cells(record.into_cells());
                index.reindex(existing, &unique_columns);
                Ok(AddOutcome::Merged(identity))
            }
        }
    }

    fn remove_record(&mut self, identity: Identity) -> bool {
        let Some(record) = self.records.remove(&identity) else {
            return false;
        };
        if let Some(index) = self.indices.get_mut(record.table()) {
            index.remove(&record);
            if index.is_empty() {
                self.indices.remove(record.table());
            }
        }
        self.graph.detach(identity);
        true
    }
}

/// Pending changes with their indices, dependency edges and freeze barrier.
#[derive(Debug)]
pub struct ChangeStore {
    state: Mutex<StoreState>,
    /// Signalled when a freeze is released
    thawed: Condvar,
    resolver: ConflictResolver,
}

impl ChangeStore {
    /// Creates an empty store validating against the given dataset.
    pub fn new(dataset: Arc<dyn DatasetValidator>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            thawed: Condvar::new(),
            resolver: ConflictResolver::new(dataset),
        }
    }

    /// Locks the state once no freeze is in effect.
    fn lock_thawed(&self) -> MutexGuard<'_, StoreState> {
        let mut state = self.state.lock();
        while state.frozen {
            self.thawed.wait(&mut state);
        }
        state
    }

    /// Adds a change, merging it into a pending update with the same identity.
    ///
    /// Blocks while the store is frozen.
    ///
    /// # Arguments
    /// * `record` - The change to add
    ///
    /// # Returns
    /// `Result<AddOutcome, EditError>`; on `Err` the store is unchanged.
    pub fn add_change(&self, record: ChangeRecord) -> Result<AddOutcome, EditError> {
        let mut state = self.lock_thawed();
        let kind = record.kind();
        let result = state.store_record(record, &self.resolver);
        drop(state);

        match &result {
            Ok(AddOutcome::Inserted(id)) => tracing::debug!("Added {} change {}", kind, id),
            Ok(AddOutcome::Merged(id)) => tracing::debug!("Merged cells into change {}", id),
            Err(e) => tracing::warn!("Rejected {} change: {}", kind, e),
        }
        result
    }

    /// Adds a change as a prerequisite of an already pending parent.
    ///
    /// # Arguments
    /// * `parent` - Identity of the pending parent change
    /// * `child` - The change that must be applied before the parent
    ///
    /// # Returns
    /// `Result<AddOutcome, EditError>`; `ParentNotFound` when the parent is
    /// not pending and `DependencyCycle` when the child is already an
    /// ancestor of the parent. On `Err` the store is unchanged.
    pub fn add_related_change(
        &self,
        parent: Identity,
        child: ChangeRecord,
    ) -> Result<AddOutcome, EditError> {
        let mut state = self.lock_thawed();
        if !state.records.contains_key(&parent) {
            tracing::warn!("Related change rejected: parent {} not pending", parent);
            return Err(EditError::ParentNotFound { parent });
        }

        let child_id = child.identity();
        if state.graph.is_reachable(child_id, parent) {
            return Err(EditError::DependencyCycle {
                parent,
                child: child_id,
            });
        }

        let outcome = state.store_record(child, &self.resolver)?;
        state.graph.attach(parent, child_id);
        drop(state);

        tracing::debug!("Attached change {} under {}", child_id, parent);
        Ok(outcome)
    }

    /// Discards changes together with descendants left without a parent.
    ///
    /// Unknown identities are ignored.
    ///
    /// # Returns
    /// The identities actually removed.
    pub fn remove_changes(&self, identities: &[Identity]) -> Vec<Identity> {
        let mut state = self.lock_thawed();
        let targets: Vec<Identity> = identities
            .iter()
            .copied()
            .filter(|id| state.records.contains_key(id))
            .collect();
        let cascade = state.graph.cascade(&targets);
        let removed: Vec<Identity> = cascade
            .into_iter()
            .filter(|id| state.remove_record(*id))
            .collect();
        drop(state);

        tracing::debug!("Discarded {} changes", removed.len());
        removed
    }

    /// Removes exactly the given changes after they were applied.
    ///
    /// Descendants are kept; their edges to a removed parent are dropped.
    ///
    /// # Returns
    /// The identities actually removed, each at most once.
    pub fn remove_applied(&self, identities: &HashSet<Identity>) -> Vec<Identity> {
        let mut state = self.lock_thawed();
        let mut removed: Vec<Identity> = identities
            .iter()
            .copied()
            .filter(|id| state.remove_record(*id))
            .collect();
        drop(state);

        removed.sort();
        tracing::debug!("Removed {} applied changes", removed.len());
        removed
    }

    /// Flips the selection flag of a change.
    ///
    /// # Returns
    /// The new selection state.
    pub fn toggle_select(&self, identity: Identity) -> Result<bool, EditError> {
        let mut state = self.lock_thawed();
        let record = state
            .records
            .get_mut(&identity)
            .ok_or(EditError::ChangeNotFound { identity })?;
        let selected = !record.is_selected();
        record.set_selected(selected);
        Ok(selected)
    }

    /// Returns the identities of all selected changes.
    pub fn selected_identities(&self) -> Vec<Identity> {
        let state = self.state.lock();
        let mut ids: Vec<Identity> = state
            .records
            .values()
            .filter(|r| r.is_selected())
            .map(ChangeRecord::identity)
            .collect();
        ids.sort();
        ids
    }

    /// Allocates a surrogate row id for a new insert.
    ///
    /// The per-table counter never falls below the dataset's highest
    /// primary key (0 if none) nor below the row id of any pending insert,
    /// so ids stay fresh across dataset refreshes.
    pub fn allocate_row_id(&self, table: &str) -> Result<i64, EditError> {
        let dataset = self.resolver.dataset();
        if !dataset.table_exists(table) {
            return Err(EditError::UnknownTable {
                table: table.to_string(),
            });
        }
        let floor = dataset.max_primary_key(table).unwrap_or(0);
        let mut state = self.state.lock();
        let counter = state.next_row_ids.entry(table.to_string()).or_insert(floor);
        *counter = (*counter).max(floor) + 1;
        Ok(*counter)
    }

    /// Returns a copy of a pending change.
    pub fn get(&self, identity: Identity) -> Option<ChangeRecord> {
        self.state.lock().records.get(&identity).cloned()
    }

    pub fn contains(&self, identity: Identity) -> bool {
        self.state.lock().records.contains_key(&identity)
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    pub fn children(&self, identity: Identity) -> Vec<Identity> {
        self.state.lock().graph.children(identity).to_vec()
    }

    pub fn has_child(&self, identity: Identity) -> bool {
        self.state.lock().graph.has_child(identity)
    }

    /// Returns pending changes that are not a prerequisite of another change.
    pub fn root_identities(&self) -> Vec<Identity> {
        let state = self.state.lock();
        let mut roots: Vec<Identity> = state
            .records
            .keys()
            .filter(|id| !state.graph.has_parent(**id))
            .copied()
            .collect();
        roots.sort();
        roots
    }

    /// Returns identities of pending changes targeting a row.
    pub fn pending_for_row(&self, table: &str, row_id: i64) -> Vec<Identity> {
        let state = self.state.lock();
        state
            .indices
            .get(table)
            .map(|index| index.row(row_id).to_vec())
            .unwrap_or_default()
    }

    /// Returns the pending change carrying a value in a unique column.
    pub fn pending_for_unique(&self, table: &str, column: &str, value: &str) -> Option<Identity> {
        let state = self.state.lock();
        state
            .indices
            .get(table)
            .and_then(|index| index.unique(column, value))
    }

    /// Takes an immutable copy of the store for read-only consumers.
    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.lock();
        let dataset = self.resolver.dataset();
        StoreSnapshot {
            records: state
                .records
                .iter()
                .map(|(id, record)| (*id, record.clone()))
                .collect(),
            by_row: state
                .indices
                .iter()
                .map(|(table, index)| (table.clone(), index.by_row.clone()))
                .collect(),
            children: state.graph.edges(),
            validity: state
                .records
                .iter()
                .map(|(id, record)| (*id, record.is_valid(dataset.as_ref())))
                .collect(),
        }
    }

    /// Freezes the store until the returned guard is dropped.
    ///
    /// Waits for an earlier freeze to be released first.
    pub fn freeze(&self) -> FreezeGuard<'_> {
        let mut state = self.lock_thawed();
        state.frozen = true;
        drop(state);
        tracing::debug!("Change store frozen");
        FreezeGuard::new(self)
    }

    pub fn is_frozen(&self) -> bool {
        self.state.lock().frozen
    }

    fn thaw(&self) {
        let mut state = self.state.lock();
        state.frozen = false;
        drop(state);
        self.thawed.notify_all();
        tracing::debug!("Change store unfrozen");
    }
}

#[cfg(test)]
mod tests;
