//! RAII freeze barrier over the change store.

use crate::change::{ChangeRecord, Identity};

use super::{ChangeStore, StoreSnapshot};

/// Holds the store frozen until dropped.
///
/// While a guard is alive every mutating store call blocks. The freeze flag
/// lives under the same mutex as the change map, so reads through the guard
/// never observe a half-applied mutation. Calling a mutating store method
/// from the thread holding the guard deadlocks.
#[derive(Debug)]
pub struct FreezeGuard<'a> {
    store: &'a ChangeStore,
}

impl<'a> FreezeGuard<'a> {
    pub(super) fn new(store: &'a ChangeStore) -> Self {
        Self { store }
    }

    /// Collects the given roots and their prerequisites in application order.
    ///
    /// # Arguments
    /// * `roots` - Identities requested for application
    ///
    /// # Returns
    /// Copies of the changes, each preceded by everything it depends on.
    pub fn collect_ordered(&self, roots: &[Identity]) -> Vec<ChangeRecord> {
        let state = self.store.state.lock();
        let order = state
            .graph
            .collect_post_order(roots, |id| state.records.contains_key(&id));
        order
            .into_iter()
            .filter_map(|id| state.records.get(&id).cloned())
            .collect()
    }

    /// Takes a snapshot of the frozen store.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.store.snapshot()
    }

    /// Releases the freeze explicitly.
    pub fn unfreeze(self) {}
}

impl Drop for FreezeGuard<'_> {
    fn drop(&mut self) {
        self.store.thaw();
    }
}
