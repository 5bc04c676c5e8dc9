//! Merge and rejection policy for colliding changes.

use std::sync::Arc;

use crate::change::ChangeRecord;
use crate::dataset::DatasetValidator;
use crate::error::EditError;

/// Outcome of resolving an incoming change against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No change exists at the identity; store the incoming record verbatim
    Insert,
    /// Merge the incoming cells into the existing update
    Merge,
}

/// Decides how an incoming change is combined with a pending one.
///
/// | Existing    | Incoming (same identity) | Result  |
/// |-------------|--------------------------|---------|
/// | none        | any                      | Insert  |
/// | InsertRow   | any                      | Reject  |
/// | DeleteRow   | any                      | Reject  |
/// | UpdateCells | UpdateCells              | Merge   |
#[derive(Clone)]
pub struct ConflictResolver {
    dataset: Arc<dyn DatasetValidator>,
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver").finish_non_exhaustive()
    }
}

impl ConflictResolver {
    pub fn new(dataset: Arc<dyn DatasetValidator>) -> Self {
        Self { dataset }
    }

    /// Returns the dataset the resolver validates against.
    pub fn dataset(&self) -> &Arc<dyn DatasetValidator> {
        &self.dataset
    }

    /// Resolves an incoming change.
    ///
    /// # Arguments
    /// * `existing` - Pending change at the incoming change's identity, if any
    /// * `incoming` - The change being added
    ///
    /// # Returns
    /// `Result<Resolution, EditError>`; an `Err` means nothing may be mutated.
    pub fn resolve(
        &self,
        existing: Option<&ChangeRecord>,
        incoming: &ChangeRecord,
    ) -> Result<Resolution, EditError> {
        if !self.dataset.table_exists(incoming.table()) {
            return Err(EditError::UnknownTable {
                table: incoming.table().to_string(),
            });
        }

        let Some(existing) = existing else {
            return Ok(Resolution::Insert);
        };

        // Identity collision between different targets is treated like any other conflict.
        let same_target = existing.kind() == incoming.kind()
            && existing.table() == incoming.table()
            && existing.row_id() == incoming.row_id();

        if existing.kind().is_structural() || !same_target {
            return Err(EditError::ChangeConflict {
                identity: incoming.identity(),
                existing: existing.kind(),
            });
        }

        Ok(Resolution::Merge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeKind;
    use crate::dataset::{DatasetSnapshot, TableData};
    use std::collections::BTreeMap;

    fn resolver() -> ConflictResolver {
        let snapshot = DatasetSnapshot::new(BTreeMap::from([(
            "categories".to_string(),
            TableData::default(),
        )]));
        ConflictResolver::new(Arc::new(snapshot))
    }

    #[test]
    fn test_unknown_table_rejected() {
        let incoming = ChangeRecord::insert_row("products", 1);
        assert_eq!(
            resolver().resolve(None, &incoming),
            Err(EditError::UnknownTable {
                table: "products".to_string()
            })
        );
    }

    #[test]
    fn test_new_identity_inserted() {
        let incoming = ChangeRecord::insert_row("categories", 1);
        assert_eq!(resolver().resolve(None, &incoming), Ok(Resolution::Insert));
    }

    #[test]
    fn test_structural_existing_rejects() {
        let resolver = resolver();
        for existing in [
            ChangeRecord::insert_row("categories", 1),
            ChangeRecord::delete_row("categories", 1),
        ] {
            let incoming = existing.clone();
            assert_eq!(
                resolver.resolve(Some(&existing), &incoming),
                Err(EditError::ChangeConflict {
                    identity: incoming.identity(),
                    existing: existing.kind(),
                })
            );
        }
    }

    #[test]
    fn test_update_merges() {
        let existing = ChangeRecord::update_cells("categories", 1, Default::default());
        let incoming = existing.clone().with_cell("name", "x");
        assert_eq!(
            resolver().resolve(Some(&existing), &incoming),
            Ok(Resolution::Merge)
        );
    }

    #[test]
    fn test_mismatched_target_rejected() {
        let existing = ChangeRecord::update_cells("categories", 1, Default::default());
        let incoming = ChangeRecord::update_cells("categories", 2, Default::default());
        assert_eq!(
            resolver().resolve(Some(&existing), &incoming),
            Err(EditError::ChangeConflict {
                identity: incoming.identity(),
                existing: ChangeKind::UpdateCells,
            })
        );
    }
}
