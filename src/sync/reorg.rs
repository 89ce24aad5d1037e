//! Three-step reorg repair: mark, re-derive, sweep.
//!
//! Each step is its own call into the store, so a crash between steps
//! leaves detectable state and re-running the whole protocol from step one
//! is idempotent: marking marked rows is a no-op, and re-derived rows
//! supersede their marked predecessors under the upsert rules.

use crate::pipeline::{BatchContext, BatchSummary, Dispatcher};
use crate::storage::RecordStore;
use anyhow::{Context, Result};

pub async fn repair(
    store: &dyn RecordStore,
    dispatcher: &Dispatcher,
    fork_block: u64,
    last_block: u64,
) -> Result<BatchSummary> {
    tracing::warn!(fork_block, last_block, "repairing reorganized range");

    let marked = store
        .mark_reorged(fork_block)
        .await
        .context("marking reorged rows")?;
    tracing::info!(marked, fork_block, "reorged rows marked");

    let summary = dispatcher
        .run(BatchContext::for_reorg(fork_block, last_block))
        .await
        .context("re-deriving reorged range")?;

    let swept = store
        .sweep_reorged()
        .await
        .context("sweeping abandoned rows")?;
    tracing::info!(
        swept,
        re_derived = summary.exported_records,
        "reorg repair complete"
    );

    Ok(summary)
}
