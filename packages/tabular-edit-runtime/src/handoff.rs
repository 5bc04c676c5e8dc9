//! One-shot publish / many-reader gate.

use parking_lot::{Condvar, Mutex};
use tabular_edit_core::error::EditError;

use crate::Result;

/// Value published exactly once and awaited by any number of readers.
///
/// Used for the backing store connection and for the ready flags between
/// dataset acquisition stages.
#[derive(Debug)]
pub struct Handoff<T> {
    name: &'static str,
    slot: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T: Clone> Handoff<T> {
    /// Creates an empty handoff; `name` appears in errors.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Publishes the value and wakes every waiter.
    ///
    /// # Returns
    /// `AlreadyPublished` on a second call; the first value is kept.
    pub fn publish(&self, value: T) -> Result<()> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(EditError::AlreadyPublished(self.name));
        }
        *slot = Some(value);
        drop(slot);
        self.ready.notify_all();
        Ok(())
    }

    /// Blocks until the value is published and returns a copy.
    pub fn wait(&self) -> T {
        let mut slot = self.slot.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return value.clone();
            }
            self.ready.wait(&mut slot);
        }
    }

    /// Returns a copy of the value without blocking.
    pub fn try_get(&self) -> Option<T> {
        self.slot.lock().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
