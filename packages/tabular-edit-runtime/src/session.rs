//! Wiring of executor, dataset, change store and coordinator.

use std::sync::Arc;

use tabular_edit_core::config::EditConfig;
use tabular_edit_core::{ChangeStore, DatasetHandle};

use crate::backing::SharedBackingStore;
use crate::coordinator::ChangeApplicationCoordinator;
use crate::executor::TaskExecutor;
use crate::handoff::Handoff;
use crate::pipeline::{DataAcquisitionPipeline, DatasetTask};
use crate::Result;

/// One editing session over a backing store.
///
/// All components share a single executor. Dependent tasks block until
/// [`EditSession::connect`] supplies the backing store.
pub struct EditSession {
    config: EditConfig,
    executor: Arc<TaskExecutor>,
    connection: Arc<Handoff<SharedBackingStore>>,
    dataset: Arc<DatasetHandle>,
    store: Arc<ChangeStore>,
    coordinator: ChangeApplicationCoordinator,
}

impl EditSession {
    /// Creates a session and starts its workers.
    pub fn new(config: EditConfig) -> Result<Self> {
        config.validate()?;
        let executor = Arc::new(TaskExecutor::from_config(&config)?);
        let connection = Arc::new(Handoff::new("backing store connection"));
        let dataset = Arc::new(DatasetHandle::new());
        let store = Arc::new(ChangeStore::new(dataset.clone()));
        let coordinator = ChangeApplicationCoordinator::new(
            store.clone(),
            executor.clone(),
            connection.clone(),
            &config,
        );

        Ok(Self {
            config,
            executor,
            connection,
            dataset,
            store,
            coordinator,
        })
    }

    /// Supplies the backing store; may be called once.
    pub fn connect(&self, backing: SharedBackingStore) -> Result<()> {
        self.connection.publish(backing)?;
        tracing::debug!("Backing store connected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_ready()
    }

    /// Starts (or restarts) dataset acquisition.
    pub fn refresh_dataset(&self) -> Result<DatasetTask> {
        DataAcquisitionPipeline::start(&self.executor, self.connection.clone(), self.dataset.clone())
    }

    pub fn config(&self) -> &EditConfig {
        &self.config
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    pub fn dataset(&self) -> &Arc<DatasetHandle> {
        &self.dataset
    }

    pub fn store(&self) -> &Arc<ChangeStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &ChangeApplicationCoordinator {
        &self.coordinator
    }

    /// Drains queued work and stops the workers.
    ///
    /// Tasks still waiting for a connection that is never supplied keep
    /// this call blocked.
    pub fn shutdown(&self) {
        self.executor.shutdown();
    }
}
