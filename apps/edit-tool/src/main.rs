//! Command-line driver for the edit engine.
//!
//! Seeds an in-memory backing store, acquires the dataset, replays a set of
//! edits, applies every pending change and prints what is left pending.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tabular_edit_core::config::EditConfig;
use tabular_edit_core::{CellMap, ChangeRecord, ChangeStore, ColumnHeader, ColumnKind};
use tabular_edit_runtime::{ApplyAction, EditSession, InMemoryBackingStore, SharedBackingStore};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the edit tool.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Worker threads (0 = available parallelism)
    #[arg(short, long, default_value_t = 0)]
    workers: usize,

    /// Interval between completion polls in milliseconds
    #[arg(long, default_value_t = 16)]
    poll_interval_ms: u64,

    /// Maximum changes per application request (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_batch_size: usize,

    /// JSON file with an array of changes to replay instead of the built-in edits
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Validate changes against the backing store without applying them
    #[arg(long)]
    validate_only: bool,
}

fn seed_backing_store() -> InMemoryBackingStore {
    InMemoryBackingStore::new().with_table(
        "categories",
        vec![
            ColumnHeader::new("id", ColumnKind::PrimaryKey),
            ColumnHeader::new("slug", ColumnKind::UniqueKey),
            ColumnHeader::plain("name"),
            ColumnHeader::plain("test"),
            ColumnHeader::plain("test2"),
        ],
        vec![
            vec!["1".into(), "books".into(), "Books".into(), "".into(), "".into()],
            vec!["2".into(), "music".into(), "Music".into(), "".into(), "".into()],
        ],
    )
}

/// Built-in edits: a new row 0 plus two updates to it that merge into one
/// change. The insert is attached as the update's prerequisite.
fn replay_builtin(store: &ChangeStore) -> anyhow::Result<()> {
    let update = store
        .add_change(ChangeRecord::update_cells("categories", 0, CellMap::new()).with_cell("test", "2"))?
        .identity();
    store.add_related_change(
        update,
        ChangeRecord::insert_row("categories", 0)
            .with_cell("slug", "misc")
            .with_cell("name", "Misc"),
    )?;
    store.add_change(ChangeRecord::update_cells("categories", 0, CellMap::new()).with_cell("test2", "3"))?;
    Ok(())
}

fn replay_script(store: &ChangeStore, path: &PathBuf) -> anyhow::Result<()> {
    for change in load_script(path)? {
        if let Err(e) = store.add_change(change) {
            tracing::warn!("Skipping change: {}", e);
        }
    }
    Ok(())
}

fn load_script(path: &PathBuf) -> anyhow::Result<Vec<ChangeRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading script {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing script {}", path.display()))
}

/// Applies every pending root until a round makes no progress.
///
/// Batches may be capped, so requests repeat while changes keep applying.
fn apply_pending(session: &EditSession, action: ApplyAction) -> anyhow::Result<()> {
    let poll_interval = Duration::from_millis(session.config().poll_interval_ms);
    loop {
        let roots = session.store().root_identities();
        let submitted = session
            .coordinator()
            .request_change_application(&roots, action)?;
        if submitted == 0 {
            return Ok(());
        }
        let applied = loop {
            if let Some(applied) = session.coordinator().get_successful_changes()? {
                break applied;
            }
            thread::sleep(poll_interval);
        };
        tracing::info!("{} of {} changes succeeded", applied.len(), submitted);
        if applied.is_empty() || action == ApplyAction::ValidateOnly {
            return Ok(());
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = EditConfig {
        worker_count: args.workers,
        poll_interval_ms: args.poll_interval_ms,
        max_batch_size: args.max_batch_size,
    };
    let session = EditSession::new(config)?;
    tracing::info!(
        "Edit session started with {} workers",
        session.executor().worker_count()
    );

    session.connect(Arc::new(seed_backing_store()) as SharedBackingStore)?;
    let dataset = session.refresh_dataset()?.wait()??;
    tracing::info!("Dataset acquired: {:?}", dataset.table_names());

    match &args.script {
        Some(path) => replay_script(session.store(), path)?,
        None => replay_builtin(session.store())?,
    }

    let action = if args.validate_only {
        ApplyAction::ValidateOnly
    } else {
        ApplyAction::Execute
    };
    apply_pending(&session, action)?;

    let snapshot = session.store().snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    if !snapshot.is_empty() {
        tracing::warn!("{} changes remain pending", snapshot.len());
    }
    session.shutdown();
    Ok(())
}
