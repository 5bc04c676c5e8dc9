//! Dependency-ordered submission of pending changes and reconciliation.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tabular_edit_core::config::EditConfig;
use tabular_edit_core::error::EditError;
use tabular_edit_core::{ChangeRecord, ChangeStore, Identity};

use crate::backing::{ApplyAction, SharedBackingStore};
use crate::executor::{TaskExecutor, TaskHandle};
use crate::handoff::Handoff;
use crate::Result;

/// Application request slot.
enum Slot {
    Idle,
    /// Reserved while the ordered batch is collected
    Collecting,
    Running(InFlight),
}

/// Batch handed to the backing store and not yet reconciled.
struct InFlight {
    action: ApplyAction,
    submitted: HashSet<Identity>,
    handle: TaskHandle<Result<HashSet<Identity>>>,
}

/// Drives application of pending changes through the backing store.
///
/// One request is in flight at a time. Changes the backing store does not
/// report as applied stay pending; there is no automatic retry.
pub struct ChangeApplicationCoordinator {
    store: Arc<ChangeStore>,
    executor: Arc<TaskExecutor>,
    connection: Arc<Handoff<SharedBackingStore>>,
    batch_limit: Option<usize>,
    slot: Mutex<Slot>,
}

impl ChangeApplicationCoordinator {
    pub fn new(
        store: Arc<ChangeStore>,
        executor: Arc<TaskExecutor>,
        connection: Arc<Handoff<SharedBackingStore>>,
        config: &EditConfig,
    ) -> Self {
        Self {
            store,
            executor,
            connection,
            batch_limit: config.batch_limit(),
            slot: Mutex::new(Slot::Idle),
        }
    }

    /// Collects the requested changes with their prerequisites and submits them.
    ///
    /// The store is frozen only while the ordered batch is collected. The
    /// request slot is reserved before freezing and its lock is not held
    /// meanwhile, so polling never waits on the freeze. With a batch limit
    /// the batch is cut to a prefix, which still never places a change
    /// before one of its prerequisites.
    ///
    /// # Arguments
    /// * `roots` - Identities to apply; unknown ones are skipped
    /// * `action` - Execute or validate only
    ///
    /// # Returns
    /// Number of changes submitted; `ApplicationInFlight` if a previous
    /// request has not been collected yet.
    pub fn request_change_application(
        &self,
        roots: &[Identity],
        action: ApplyAction,
    ) -> Result<usize> {
        {
            let mut slot = self.slot.lock();
            if !matches!(*slot, Slot::Idle) {
                return Err(EditError::ApplicationInFlight);
            }
            *slot = Slot::Collecting;
        }

        let submitted = self.collect_and_submit(roots, action);
        let mut slot = self.slot.lock();
        match submitted {
            Ok(Some(request)) => {
                let count = request.submitted.len();
                *slot = Slot::Running(request);
                Ok(count)
            }
            Ok(None) => {
                *slot = Slot::Idle;
                Ok(0)
            }
            Err(e) => {
                *slot = Slot::Idle;
                Err(e)
            }
        }
    }

    fn collect_and_submit(
        &self,
        roots: &[Identity],
        action: ApplyAction,
    ) -> Result<Option<InFlight>> {
        let mut ordered: Vec<ChangeRecord> = {
            let guard = self.store.freeze();
            guard.collect_ordered(roots)
        };
        if let Some(limit) = self.batch_limit {
            ordered.truncate(limit);
        }
        if ordered.is_empty() {
            return Ok(None);
        }

        let count = ordered.len();
        let submitted: HashSet<Identity> = ordered.iter().map(ChangeRecord::identity).collect();
        let connection = self.connection.clone();
        let handle = self.executor.submit(move || {
            let store = connection.wait();
            store.apply_changes(&ordered, action)
        })?;

        tracing::debug!("Submitted {} changes for {:?}", count, action);
        Ok(Some(InFlight {
            action,
            submitted,
            handle,
        }))
    }

    /// Polls the in-flight request without blocking.
    ///
    /// # Returns
    /// `true` when a result is ready to be collected.
    pub fn is_application_done(&self) -> bool {
        match &mut *self.slot.lock() {
            Slot::Running(request) => request.handle.poll(),
            Slot::Idle | Slot::Collecting => false,
        }
    }

    /// Returns whether no request is being collected or waiting to be collected.
    pub fn is_idle(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Idle)
    }

    /// Collects a finished request and reconciles the store.
    ///
    /// For `Execute`, exactly the reported identities that were part of the
    /// batch are removed from the store. A `ValidateOnly` result leaves the
    /// store untouched.
    ///
    /// # Returns
    /// `Ok(None)` while idle or still running, otherwise the reported
    /// identities. A task or backing store failure is returned as `Err` and
    /// every change of the batch stays pending.
    pub fn get_successful_changes(&self) -> Result<Option<HashSet<Identity>>> {
        let mut slot = self.slot.lock();
        let ready = match &mut *slot {
            Slot::Running(request) => request.handle.poll(),
            Slot::Idle | Slot::Collecting => false,
        };
        if !ready {
            return Ok(None);
        }
        let Slot::Running(mut request) = std::mem::replace(&mut *slot, Slot::Idle) else {
            return Ok(None);
        };
        drop(slot);

        let reported = request
            .handle
            .try_take()
            .unwrap_or(Err(EditError::TaskAbandoned))
            .and_then(|applied| applied)
            .inspect_err(|e| tracing::error!("Change application failed: {}", e))?;

        let succeeded: HashSet<Identity> = reported
            .intersection(&request.submitted)
            .copied()
            .collect();
        let failed = request.submitted.len() - succeeded.len();
        if failed > 0 {
            tracing::warn!("{} changes were not applied and remain pending", failed);
        }

        if request.action == ApplyAction::Execute {
            self.store.remove_applied(&succeeded);
        }
        Ok(Some(succeeded))
    }
}
