use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ntest::timeout;

use super::*;
use crate::change::{CellMap, ChangeKind};
use crate::dataset::{ColumnHeader, ColumnKind, DatasetHandle, DatasetSnapshot, TableData};

fn categories_dataset() -> Arc<DatasetHandle> {
    let mut table = TableData::new(
        vec![
            ColumnHeader::new("id", ColumnKind::PrimaryKey),
            ColumnHeader::new("slug", ColumnKind::UniqueKey),
            ColumnHeader::plain("name"),
        ],
        vec![
            vec!["1".into(), "books".into(), "Books".into()],
            vec!["7".into(), "music".into(), "Music".into()],
        ],
    );
    table.max_primary_key = table.compute_max_primary_key();
    let handle = Arc::new(DatasetHandle::new());
    handle.publish(Arc::new(DatasetSnapshot::new(BTreeMap::from([
        ("categories".to_string(), table),
        ("products".to_string(), TableData::default()),
    ]))));
    handle
}

fn create_test_store() -> ChangeStore {
    ChangeStore::new(categories_dataset())
}

fn cells(pairs: &[(&str, &str)]) -> CellMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[timeout(1000)]
#[test]
fn test_insert_then_updates_scenario() {
    let store = create_test_store();

    let a = store
        .add_change(ChangeRecord::insert_row("categories", 0))
        .unwrap();
    assert!(a.is_inserted());

    let b = store
        .add_change(ChangeRecord::update_cells(
            "categories",
            0,
            cells(&[("test", "2")]),
        ))
        .unwrap();
    assert!(b.is_inserted());
    assert_ne!(a.identity(), b.identity());

    let merged = store
        .add_change(ChangeRecord::update_cells(
            "categories",
            0,
            cells(&[("test2", "3")]),
        ))
        .unwrap();
    assert_eq!(merged, AddOutcome::Merged(b.identity()));

    assert_eq!(store.len(), 2);
    let insert = store.get(a.identity()).unwrap();
    assert_eq!(insert.kind(), ChangeKind::InsertRow);
    assert!(insert.cells().is_empty());
    let update = store.get(b.identity()).unwrap();
    assert_eq!(update.kind(), ChangeKind::UpdateCells);
    assert_eq!(update.cells(), &cells(&[("test", "2"), ("test2", "3")]));
}

#[timeout(1000)]
#[test]
fn test_merge_matches_combined_update() {
    let split = create_test_store();
    split
        .add_change(ChangeRecord::update_cells("categories", 4, cells(&[("a", "1")])))
        .unwrap();
    let id = split
        .add_change(ChangeRecord::update_cells("categories", 4, cells(&[("b", "2")])))
        .unwrap()
        .identity();

    let combined = create_test_store();
    combined
        .add_change(ChangeRecord::update_cells(
            "categories",
            4,
            cells(&[("a", "1"), ("b", "2")]),
        ))
        .unwrap();

    assert_eq!(
        split.get(id).unwrap().cells(),
        combined.get(id).unwrap().cells()
    );
}

#[timeout(1000)]
#[test]
fn test_merge_last_write_wins_per_column() {
    let store = create_test_store();
    let id = store
        .add_change(ChangeRecord::update_cells("categories", 4, cells(&[("a", "1")])))
        .unwrap()
        .identity();
    store
        .add_change(ChangeRecord::update_cells("categories", 4, cells(&[("a", "2")])))
        .unwrap();
    assert_eq!(store.get(id).unwrap().cells(), &cells(&[("a", "2")]));
}

#[timeout(1000)]
#[test]
fn test_insert_and_delete_are_exclusive() {
    let store = create_test_store();
    for record in [
        ChangeRecord::insert_row("categories", 20),
        ChangeRecord::delete_row("categories", 1),
    ] {
        let id = store.add_change(record.clone()).unwrap().identity();
        let again = record.clone().with_cell("name", "changed");
        let err = store.add_change(again).unwrap_err();
        assert_eq!(
            err,
            EditError::ChangeConflict {
                identity: id,
                existing: record.kind(),
            }
        );
        assert_eq!(store.get(id).unwrap(), record);
    }
    assert_eq!(store.len(), 2);
}

#[timeout(1000)]
#[test]
fn test_unknown_table_rejected_without_mutation() {
    let store = create_test_store();
    let err = store
        .add_change(ChangeRecord::insert_row("missing", 1))
        .unwrap_err();
    assert_eq!(
        err,
        EditError::UnknownTable {
            table: "missing".to_string()
        }
    );
    assert!(store.is_empty());
    assert!(store.pending_for_row("missing", 1).is_empty());
}

#[timeout(1000)]
#[test]
fn test_everything_rejected_before_dataset_published() {
    let store = ChangeStore::new(Arc::new(DatasetHandle::new()));
    assert!(store
        .add_change(ChangeRecord::insert_row("categories", 1))
        .is_err());
    assert!(store.allocate_row_id("categories").is_err());
}

#[timeout(1000)]
#[test]
fn test_dependency_chain_ordering() {
    let store = create_test_store();
    let root = store
        .add_change(ChangeRecord::update_cells("products", 1, cells(&[("category", "8")])))
        .unwrap()
        .identity();
    let c1 = store
        .add_related_change(root, ChangeRecord::update_cells("categories", 8, cells(&[("name", "x")])))
        .unwrap()
        .identity();
    let c2 = store
        .add_related_change(c1, ChangeRecord::insert_row("categories", 8))
        .unwrap()
        .identity();

    assert!(store.has_child(root));
    assert_eq!(store.children(root), vec![c1]);
    assert_eq!(store.root_identities(), vec![root]);

    let guard = store.freeze();
    let order: Vec<Identity> = guard
        .collect_ordered(&[root])
        .iter()
        .map(ChangeRecord::identity)
        .collect();
    guard.unfreeze();
    assert_eq!(order, vec![c2, c1, root]);
}

#[timeout(1000)]
#[test]
fn test_related_change_requires_parent() {
    let store = create_test_store();
    let ghost = Identity::of(ChangeKind::InsertRow, "categories", 99);
    let err = store
        .add_related_change(ghost, ChangeRecord::insert_row("categories", 100))
        .unwrap_err();
    assert_eq!(err, EditError::ParentNotFound { parent: ghost });
    assert!(store.is_empty());
}

#[timeout(1000)]
#[test]
fn test_related_change_cycle_rejected() {
    let store = create_test_store();
    let parent = store
        .add_change(ChangeRecord::update_cells("categories", 1, cells(&[("name", "a")])))
        .unwrap()
        .identity();
    let child = store
        .add_related_change(
            parent,
            ChangeRecord::update_cells("categories", 2, cells(&[("name", "b")])),
        )
        .unwrap()
        .identity();

    let err = store
        .add_related_change(
            child,
            ChangeRecord::update_cells("categories", 1, cells(&[("name", "c")])),
        )
        .unwrap_err();
    assert_eq!(err, EditError::DependencyCycle { parent: child, child: parent });
    assert_eq!(store.get(parent).unwrap().cells(), &cells(&[("name", "a")]));
    assert!(!store.has_child(child));
}

#[timeout(5000)]
#[test]
fn test_freeze_blocks_add_change_until_unfreeze() {
    let store = Arc::new(create_test_store());
    let returned = Arc::new(AtomicBool::new(false));

    let guard = store.freeze();
    assert!(store.is_frozen());

    let writer = {
        let store = store.clone();
        let returned = returned.clone();
        thread::spawn(move || {
            let outcome = store.add_change(ChangeRecord::insert_row("categories", 50));
            returned.store(true, Ordering::SeqCst);
            outcome
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!returned.load(Ordering::SeqCst));
    // Readers are not blocked by the freeze.
    assert!(guard.snapshot().is_empty());
    assert!(store.is_empty());

    drop(guard);
    let outcome = writer.join().unwrap();
    assert!(outcome.unwrap().is_inserted());
    assert!(returned.load(Ordering::SeqCst));
    assert!(!store.is_frozen());
    assert_eq!(store.len(), 1);
}

#[timeout(5000)]
#[test]
fn test_second_freeze_waits_for_first() {
    let store = Arc::new(create_test_store());
    let first = store.freeze();
    let acquired = Arc::new(AtomicBool::new(false));

    let other = {
        let store = store.clone();
        let acquired = acquired.clone();
        thread::spawn(move || {
            let _guard = store.freeze();
            acquired.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!acquired.load(Ordering::SeqCst));
    first.unfreeze();
    other.join().unwrap();
    assert!(acquired.load(Ordering::SeqCst));
    assert!(!store.is_frozen());
}

#[timeout(1000)]
#[test]
fn test_remove_changes_cascades_to_orphans() {
    let store = create_test_store();
    let root = store
        .add_change(ChangeRecord::update_cells("products", 1, cells(&[("category", "8")])))
        .unwrap()
        .identity();
    let child = store
        .add_related_change(root, ChangeRecord::insert_row("categories", 8))
        .unwrap()
        .identity();
    let other = store
        .add_change(ChangeRecord::delete_row("categories", 1))
        .unwrap()
        .identity();

    let removed = store.remove_changes(&[root, Identity::from_raw(42)]);
    assert_eq!(removed, vec![root, child]);
    assert!(!store.contains(child));
    assert!(store.contains(other));
    assert!(store.pending_for_row("categories", 8).is_empty());
}

#[timeout(1000)]
#[test]
fn test_remove_applied_keeps_descendants() {
    let store = create_test_store();
    let root = store
        .add_change(ChangeRecord::update_cells("products", 1, cells(&[("category", "8")])))
        .unwrap()
        .identity();
    let child = store
        .add_related_change(root, ChangeRecord::insert_row("categories", 8))
        .unwrap()
        .identity();

    let applied = HashSet::from([root, Identity::from_raw(7)]);
    assert_eq!(store.remove_applied(&applied), vec![root]);
    assert!(store.contains(child));
    assert_eq!(store.root_identities(), vec![child]);
    assert!(store.remove_applied(&applied).is_empty());
}

#[timeout(1000)]
#[test]
fn test_toggle_select() {
    let store = create_test_store();
    let id = store
        .add_change(ChangeRecord::delete_row("categories", 7))
        .unwrap()
        .identity();

    assert_eq!(store.toggle_select(id), Ok(true));
    assert_eq!(store.selected_identities(), vec![id]);
    assert_eq!(store.toggle_select(id), Ok(false));
    assert!(store.selected_identities().is_empty());

    let missing = Identity::from_raw(1);
    assert_eq!(
        store.toggle_select(missing),
        Err(EditError::ChangeNotFound { identity: missing })
    );
}

#[timeout(1000)]
#[test]
fn test_allocate_row_id_starts_after_max_primary_key() {
    let store = create_test_store();
    assert_eq!(store.allocate_row_id("categories"), Ok(8));
    assert_eq!(store.allocate_row_id("categories"), Ok(9));
    assert_eq!(store.allocate_row_id("products"), Ok(1));
    assert!(matches!(
        store.allocate_row_id("missing"),
        Err(EditError::UnknownTable { .. })
    ));
}

#[timeout(1000)]
#[test]
fn test_allocate_row_id_skips_pending_inserts() {
    let store = create_test_store();
    store
        .add_change(ChangeRecord::insert_row("categories", 8))
        .unwrap();
    store
        .add_change(ChangeRecord::insert_row("categories", 3))
        .unwrap();

    let allocated = store.allocate_row_id("categories").unwrap();
    assert_eq!(allocated, 9);
    assert!(store
        .add_change(ChangeRecord::insert_row("categories", allocated))
        .unwrap()
        .is_inserted());
    assert_eq!(store.allocate_row_id("categories"), Ok(10));

    // Only inserts claim ids.
    store
        .add_change(ChangeRecord::update_cells("categories", 50, cells(&[("name", "x")])))
        .unwrap();
    assert_eq!(store.allocate_row_id("categories"), Ok(11));
}

#[timeout(1000)]
#[test]
fn test_unique_index_keeps_remaining_holder() {
    let store = create_test_store();
    let insert = store
        .add_change(ChangeRecord::insert_row("categories", 20).with_cell("slug", "games"))
        .unwrap()
        .identity();
    let update = store
        .add_change(ChangeRecord::update_cells("categories", 20, cells(&[("slug", "games")])))
        .unwrap()
        .identity();
    assert_eq!(store.pending_for_unique("categories", "slug", "games"), Some(insert));

    store.remove_changes(&[update]);
    assert!(store.contains(insert));
    assert_eq!(store.pending_for_unique("categories", "slug", "games"), Some(insert));

    // Removing the other holder first leaves the update findable.
    let update = store
        .add_change(ChangeRecord::update_cells("categories", 20, cells(&[("slug", "games")])))
        .unwrap()
        .identity();
    store.remove_applied(&HashSet::from([insert]));
    assert_eq!(store.pending_for_unique("categories", "slug", "games"), Some(update));

    store.remove_changes(&[update]);
    assert_eq!(store.pending_for_unique("categories", "slug", "games"), None);
}

#[timeout(1000)]
#[test]
fn test_row_and_unique_indices_follow_merges_and_removal() {
    let store = create_test_store();
    let insert = store
        .add_change(ChangeRecord::insert_row("categories", 8))
        .unwrap()
        .identity();
    let update = store
        .add_change(ChangeRecord::update_cells("categories", 8, cells(&[("slug", "games")])))
        .unwrap()
        .identity();

    assert_eq!(store.pending_for_row("categories", 8), vec![insert, update]);
    assert_eq!(store.pending_for_unique("categories", "slug", "games"), Some(update));

    store
        .add_change(ChangeRecord::update_cells("categories", 8, cells(&[("slug", "toys")])))
        .unwrap();
    assert_eq!(store.pending_for_unique("categories", "slug", "games"), None);
    assert_eq!(store.pending_for_unique("categories", "slug", "toys"), Some(update));
    // Plain columns are not indexed.
    store
        .add_change(ChangeRecord::update_cells("categories", 8, cells(&[("name", "Toys")])))
        .unwrap();
    assert_eq!(store.pending_for_unique("categories", "name", "Toys"), None);

    store.remove_changes(&[update]);
    assert_eq!(store.pending_for_row("categories", 8), vec![insert]);
    assert_eq!(store.pending_for_unique("categories", "slug", "toys"), None);
}

#[timeout(1000)]
#[test]
fn test_snapshot_is_detached_copy() {
    let store = create_test_store();
    let id = store
        .add_change(ChangeRecord::insert_row("categories", 8))
        .unwrap()
        .identity();

    let snapshot = store.snapshot();
    store.remove_changes(&[id]);

    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.is_valid(id));
    assert_eq!(snapshot.row("categories", 8).len(), 1);
    assert_eq!(snapshot.roots(), vec![id]);
    assert!(store.snapshot().is_empty());
}

#[timeout(5000)]
#[test]
fn test_concurrent_updates_merge_into_one_record() {
    let store = Arc::new(create_test_store());
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    store
                        .add_change(ChangeRecord::update_cells(
                            "categories",
                            1,
                            cells(&[(format!("c{}_{}", t, i).as_str(), "v")]),
                        ))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.len(), 1);
    let id = Identity::of(ChangeKind::UpdateCells, "categories", 1);
    assert_eq!(store.get(id).unwrap().cells().len(), 400);
}
