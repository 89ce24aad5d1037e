use crate::exceptions::ExceptionRecorder;
use crate::pipeline::{BatchContext, Dispatcher};
use crate::rpc::EvmRpcClient;
use crate::runtime::telemetry::Telemetry;
use crate::storage::RecordStore;
use crate::sync::cursor::{Cursor, CursorStore};
use crate::sync::reorg;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio_util::sync::CancellationToken;

/// Loop parameters, validated by the configuration layer before the
/// controller is built.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// First block to sync when no cursor exists yet.
    pub start_block: u64,
    /// Upper bound on blocks per batch.
    pub block_batch_size: u64,
    /// Sleep between polls once caught up with the head.
    pub poll_interval: Duration,
    pub reorg_check: bool,
    /// How far behind the tip the fork-point walk may look.
    pub reorg_window: u64,
}

enum Progress {
    /// Synced a range; `caught_up` means the batch reached the head.
    Synced { caught_up: bool },
    /// Nothing to do: cursor is at the head.
    Idle,
}

/// Outermost loop: determines the next range, dispatches it, advances the
/// cursor, and optionally checks for reorgs. Shutdown is observed between
/// batches only, so an in-flight dispatcher run always completes.
pub struct SyncController {
    client: Arc<EvmRpcClient>,
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn RecordStore>,
    cursor_store: Arc<dyn CursorStore>,
    exceptions: Arc<ExceptionRecorder>,
    telemetry: Arc<Telemetry>,
    settings: ControllerSettings,
    shutdown: CancellationToken,
}

/// Next inclusive range to sync, or `None` when the cursor is at the head.
fn next_range(next_block: u64, head: u64, block_batch_size: u64) -> Option<(u64, u64)> {
    if next_block > head {
        return None;
    }
    let last = head.min(next_block + block_batch_size.saturating_sub(1));
    Some((next_block, last))
}

impl SyncController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<EvmRpcClient>,
        dispatcher: Arc<Dispatcher>,
        store: Arc<dyn RecordStore>,
        cursor_store: Arc<dyn CursorStore>,
        exceptions: Arc<ExceptionRecorder>,
        telemetry: Arc<Telemetry>,
        settings: ControllerSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client,
            dispatcher,
            store,
            cursor_store,
            exceptions,
            telemetry,
            settings,
            shutdown,
        }
    }

    pub async fn run(&self) -> Result<()> {
        tracing::info!(
            start_block = self.settings.start_block,
            block_batch_size = self.settings.block_batch_size,
            reorg_check = self.settings.reorg_check,
            "sync controller started"
        );

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.step().await {
                Ok(Progress::Synced { caught_up: false }) => {
                    // Still behind the head: go straight to the next range.
                    continue;
                }
                Ok(Progress::Synced { caught_up: true }) | Ok(Progress::Idle) => {
                    self.sleep().await;
                }
                Err(error) => {
                    // Sleep-and-retry is the recovery path for sink and RPC
                    // outages; only configuration errors abort before this
                    // loop ever starts.
                    tracing::error!(error = format!("{error:#}"), "batch failed; will retry");
                    self.sleep().await;
                }
            }
        }

        self.exceptions.force_flush().await;
        tracing::info!("sync controller stopped");
        Ok(())
    }

    /// One pass of the state machine: DETERMINE_RANGE, SYNC_RANGE,
    /// ADVANCE_CURSOR, then the optional REORG_CHECK.
    async fn step(&self) -> Result<Progress> {
        let cursor = self.cursor_store.read().await.context("reading cursor")?;
        let head = self
            .client
            .head_block_number()
            .await
            .context("fetching head block number")?;

        let next_block = cursor
            .map(|cursor| cursor.block_number + 1)
            .unwrap_or(self.settings.start_block);
        let Some((first, last)) = next_range(next_block, head, self.settings.block_batch_size)
        else {
            if let (true, Some(cursor)) = (self.settings.reorg_check, cursor) {
                self.check_and_repair(cursor).await?;
            }
            return Ok(Progress::Idle);
        };

        let summary = self.dispatcher.run(BatchContext::new(first, last)).await?;

        // The exporter has durably written the range; only now may the
        // cursor move. A crash before this point redoes the range, which
        // the upsert rules make idempotent.
        let block_hash = match summary.last_block_hash {
            Some((number, hash)) if number == last => hash,
            _ => {
                self.client
                    .get_block_header(last)
                    .await?
                    .with_context(|| format!("block {last} disappeared before cursor advance"))?
                    .hash
            }
        };
        let advanced = Cursor {
            block_number: last,
            block_hash,
        };
        self.cursor_store
            .write(advanced)
            .await
            .context("advancing cursor")?;
        self.exceptions.force_flush().await;

        if self.settings.reorg_check {
            self.check_and_repair(advanced).await?;
        }

        Ok(Progress::Synced {
            caught_up: last >= head,
        })
    }

    /// Compares the cursor's recorded hash against the freshly fetched
    /// header at the same height; a mismatch triggers the repair protocol.
    async fn check_and_repair(&self, cursor: Cursor) -> Result<()> {
        let Some(fresh) = self.client.get_block_header(cursor.block_number).await? else {
            tracing::warn!(
                block = cursor.block_number,
                "synced block no longer exists upstream; deferring to next poll"
            );
            return Ok(());
        };
        if fresh.hash == cursor.block_hash {
            return Ok(());
        }

        tracing::warn!(
            block = cursor.block_number,
            stored = %cursor.block_hash,
            fresh = %fresh.hash,
            "chain reorganization detected"
        );
        self.telemetry.record_reorg();

        let fork_block = self.find_fork_block(cursor.block_number).await?;
        reorg::repair(
            self.store.as_ref(),
            &self.dispatcher,
            fork_block,
            cursor.block_number,
        )
        .await?;

        let repaired = self
            .client
            .get_block_header(cursor.block_number)
            .await?
            .with_context(|| format!("block {} missing after reorg repair", cursor.block_number))?;
        self.cursor_store
            .write(Cursor {
                block_number: cursor.block_number,
                block_hash: repaired.hash,
            })
            .await
            .context("rewriting cursor after reorg repair")?;
        self.exceptions.force_flush().await;
        Ok(())
    }

    /// Walks back from the tip comparing stored block hashes against fresh
    /// headers. The first matching height is the last common block; the
    /// fork starts one above it. The walk is bounded by `reorg_window`; a
    /// reorg deeper than the window repairs the whole window.
    async fn find_fork_block(&self, tip: u64) -> Result<u64> {
        let floor = tip
            .saturating_sub(self.settings.reorg_window.saturating_sub(1))
            .max(self.settings.start_block);

        let mut number = tip;
        loop {
            let stored = self.store.stored_block_hash(number).await?;
            let fresh = self
                .client
                .get_block_header(number)
                .await?
                .map(|block| block.hash);
            if let (Some(stored), Some(fresh)) = (stored, fresh) {
                if stored == fresh {
                    return Ok(number + 1);
                }
            }
            if number <= floor {
                tracing::warn!(
                    floor,
                    tip,
                    "fork point not found within reorg window; repairing the whole window"
                );
                return Ok(floor);
            }
            number -= 1;
        }
    }

    async fn sleep(&self) {
        select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.settings.poll_interval) => {}
        }
    }
}
