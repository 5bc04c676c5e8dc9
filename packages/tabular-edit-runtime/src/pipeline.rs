//! Three-stage dataset acquisition.
//!
//! Stage 1 fetches table names, stage 2 column headers, stage 3 row values.
//! Each stage runs as its own executor task and blocks on its predecessor's
//! ready flag. A final derived task computes each table's highest primary
//! key and only then publishes the snapshot.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tabular_edit_core::error::EditError;
use tabular_edit_core::{ColumnHeader, DatasetHandle, DatasetSnapshot, TableData};

use crate::backing::SharedBackingStore;
use crate::executor::{panic_message, TaskExecutor, TaskHandle};
use crate::handoff::Handoff;
use crate::Result;

/// Stage output shared with the next stage; errors are forwarded downstream.
type StageOutput<T> = std::result::Result<Arc<T>, EditError>;

/// Handle to the final acquisition task.
pub type DatasetTask = TaskHandle<Result<Arc<DatasetSnapshot>>>;

/// Ready flags between the acquisition stages of one run.
struct Stages {
    tables: Handoff<StageOutput<Vec<String>>>,
    headers: Handoff<StageOutput<BTreeMap<String, Vec<ColumnHeader>>>>,
    rows: Handoff<StageOutput<BTreeMap<String, TableData>>>,
}

/// Fetches the dataset from the backing store and publishes it.
pub struct DataAcquisitionPipeline;

impl DataAcquisitionPipeline {
    /// Submits all acquisition stages.
    ///
    /// Stages are queued in order, so a single worker is enough to make
    /// progress. Calling this again refreshes the dataset.
    ///
    /// # Arguments
    /// * `executor` - Shared task executor
    /// * `connection` - Backing store gate every stage waits on
    /// * `dataset` - Handle the finished snapshot is published to
    ///
    /// # Returns
    /// Handle yielding the published snapshot or the first stage error.
    pub fn start(
        executor: &TaskExecutor,
        connection: Arc<Handoff<SharedBackingStore>>,
        dataset: Arc<DatasetHandle>,
    ) -> Result<DatasetTask> {
        let stages = Arc::new(Stages {
            tables: Handoff::new("table list"),
            headers: Handoff::new("table headers"),
            rows: Handoff::new("table rows"),
        });

        {
            let stages = stages.clone();
            let connection = connection.clone();
            executor.submit(move || {
                run_stage(&stages.tables, "table list", || {
                    let store = connection.wait();
                    store.fetch_table_names()
                })
            })?;
        }

        {
            let stages = stages.clone();
            let connection = connection.clone();
            executor.submit(move || {
                let tables = stages.tables.wait();
                run_stage(&stages.headers, "table headers", || {
                    let tables = tables?;
                    let store = connection.wait();
                    tables
                        .iter()
                        .map(|table| Ok((table.clone(), store.fetch_headers(table)?)))
                        .collect()
                })
            })?;
        }

        {
            let stages = stages.clone();
            executor.submit(move || {
                let headers = stages.headers.wait();
                run_stage(&stages.rows, "table rows", || {
                    let headers = headers?;
                    let store = connection.wait();
                    headers
                        .iter()
                        .map(|(table, headers)| {
                            Ok((table.clone(), fetch_rows(&store, table, headers)?))
                        })
                        .collect()
                })
            })?;
        }

        executor.submit(move || -> Result<Arc<DatasetSnapshot>> {
            let rows = stages.rows.wait()?;
            let tables = rows
                .iter()
                .map(|(name, data)| {
                    let mut data = data.clone();
                    data.max_primary_key = data.compute_max_primary_key();
                    (name.clone(), data)
                })
                .collect();
            let snapshot = Arc::new(DatasetSnapshot::new(tables));
            dataset.publish(snapshot.clone());
            Ok(snapshot)
        })
    }
}

/// Runs one stage body and always publishes its outcome.
///
/// A panicking body is forwarded as `TaskPanicked` so downstream stages
/// never wait on a flag that is not going to be set.
fn run_stage<T>(
    ready: &Handoff<StageOutput<T>>,
    name: &'static str,
    body: impl FnOnce() -> Result<T>,
) {
    let output = match catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result.map(Arc::new),
        Err(panic) => Err(EditError::TaskPanicked(panic_message(panic.as_ref()))),
    };
    match &output {
        Ok(_) => tracing::debug!("Acquisition stage '{}' complete", name),
        Err(e) => tracing::error!("Acquisition stage '{}' failed: {}", name, e),
    }
    if let Err(e) = ready.publish(output) {
        tracing::warn!("{}", e);
    }
}

/// Fetches a table column by column and assembles the rows.
fn fetch_rows(
    store: &SharedBackingStore,
    table: &str,
    headers: &[ColumnHeader],
) -> Result<TableData> {
    let columns = headers
        .iter()
        .map(|header| store.fetch_column(table, &header.name))
        .collect::<Result<Vec<_>>>()?;

    let row_count = columns.iter().map(Vec::len).max().unwrap_or(0);
    let rows = (0..row_count)
        .map(|row| {
            columns
                .iter()
                .map(|column| column.get(row).cloned().unwrap_or_default())
                .collect()
        })
        .collect();

    Ok(TableData::new(headers.to_vec(), rows))
}
