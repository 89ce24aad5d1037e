use crate::rpc::EvmRpcClient;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Lightweight rolling counters used to derive runtime metrics.
#[derive(Default, Debug)]
pub struct Telemetry {
    synced_blocks: AtomicU64,
    upserted_records: AtomicU64,
    completed_batches: AtomicU64,
    multicall_chunks: AtomicU64,
    fallback_calls: AtomicU64,
    reorgs_handled: AtomicU64,
}

impl Telemetry {
    pub fn record_synced_blocks(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.synced_blocks.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_upserted_records(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.upserted_records.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_completed_batch(&self) {
        self.completed_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_multicall_chunks(&self, count: u64) {
        self.multicall_chunks.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_fallback_calls(&self, count: u64) {
        self.fallback_calls.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_reorg(&self) {
        self.reorgs_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn synced_blocks(&self) -> u64 {
        self.synced_blocks.load(Ordering::Relaxed)
    }

    pub fn reorgs_handled(&self) -> u64 {
        self.reorgs_handled.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            synced_blocks: self.synced_blocks.load(Ordering::Relaxed),
            upserted_records: self.upserted_records.load(Ordering::Relaxed),
            completed_batches: self.completed_batches.load(Ordering::Relaxed),
            multicall_chunks: self.multicall_chunks.load(Ordering::Relaxed),
            fallback_calls: self.fallback_calls.load(Ordering::Relaxed),
            reorgs_handled: self.reorgs_handled.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TelemetrySnapshot {
    pub synced_blocks: u64,
    pub upserted_records: u64,
    pub completed_batches: u64,
    pub multicall_chunks: u64,
    pub fallback_calls: u64,
    pub reorgs_handled: u64,
}

/// Spawns a background task that periodically logs throughput, record counts,
/// and RPC error rates.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    client: Arc<EvmRpcClient>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "chainflow::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current_snapshot = telemetry.snapshot();
                    let synced_delta = current_snapshot
                        .synced_blocks
                        .saturating_sub(last_snapshot.synced_blocks);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        synced_delta as f64 / elapsed
                    };
                    let rpc = client.metrics();

                    tracing::info!(
                        target: "chainflow::metrics",
                        throughput = format!("{throughput:.2}"),
                        synced_blocks = current_snapshot.synced_blocks,
                        upserted_records = current_snapshot.upserted_records,
                        completed_batches = current_snapshot.completed_batches,
                        multicall_chunks = current_snapshot.multicall_chunks,
                        fallback_calls = current_snapshot.fallback_calls,
                        reorgs_handled = current_snapshot.reorgs_handled,
                        rpc_requests = rpc.total_requests,
                        rpc_errors = rpc.total_errors,
                        rpc_timeouts = rpc.total_timeouts,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current_snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
