//! Content-addressed identity of a change record.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ChangeKind;

/// Golden-ratio constant mixed into every combine step.
const MIX_CONSTANT: u64 = 0x9e37_79b9;

/// Identity of a change, derived from `(kind, table, row_id)` only.
///
/// Two records with the same kind, table and row id share an identity
/// regardless of their cell payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(u64);

impl Identity {
    /// Computes the identity of a change.
    ///
    /// # Arguments
    /// * `kind` - Mutation kind
    /// * `table` - Target table name
    /// * `row_id` - Target row id
    ///
    /// # Returns
    /// The identity; a pure function of the three arguments.
    pub fn of(kind: ChangeKind, table: &str, row_id: i64) -> Self {
        let mut h = 0u64;
        for component in [kind.component_hash(), table_hash(table), row_id as u64] {
            h = combine(h, component);
        }
        Self(h)
    }

    /// Wraps a raw identity value.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identity value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:016x}", self.0)
    }
}

/// Order-sensitive mix: `h ^ (component + MIX + (h << 6) + (h >> 2))`.
fn combine(h: u64, component: u64) -> u64 {
    h ^ component
        .wrapping_add(MIX_CONSTANT)
        .wrapping_add(h << 6)
        .wrapping_add(h >> 2)
}

/// CRC32 of the table name, stable across runs and platforms.
fn table_hash(table: &str) -> u64 {
    u64::from(crc32fast::hash(table.as_bytes()))
}
