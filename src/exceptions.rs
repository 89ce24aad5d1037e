//! Process-wide fault sink. Explicitly constructed and dependency-injected
//! (never a global), thread-safe, and loss-tolerant: recording never blocks
//! the synchronization hot path, and sink failures are retried once then
//! swallowed so diagnostics can never take the pipeline down.

use crate::records::RecordKind;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DEFAULT_FLUSH_HIGH_WATER: usize = 256;
const FLUSH_WAIT_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => f.write_str("info"),
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// Append-only diagnostic record. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct ExceptionRecord {
    pub block_number: u64,
    pub record_kind: Option<RecordKind>,
    pub message_type: &'static str,
    pub message: String,
    pub context: String,
    pub severity: Severity,
}

/// Durable destination for exception records, bulk-inserted per flush.
#[async_trait]
pub trait ExceptionSink: Send + Sync {
    async fn insert(&self, records: Vec<ExceptionRecord>) -> anyhow::Result<()>;
}

/// In-memory sink used by tests and the default wiring.
#[derive(Debug, Default)]
pub struct MemoryExceptionSink {
    records: Mutex<Vec<ExceptionRecord>>,
}

#[async_trait]
impl ExceptionSink for MemoryExceptionSink {
    async fn insert(&self, records: Vec<ExceptionRecord>) -> anyhow::Result<()> {
        self.records
            .lock()
            .expect("exception sink mutex poisoned")
            .extend(records);
        Ok(())
    }
}

impl MemoryExceptionSink {
    pub fn recorded(&self) -> Vec<ExceptionRecord> {
        self.records
            .lock()
            .expect("exception sink mutex poisoned")
            .clone()
    }
}

pub struct ExceptionRecorder {
    queue: Mutex<Vec<ExceptionRecord>>,
    flushing: AtomicBool,
    high_water: usize,
    sink: Arc<dyn ExceptionSink>,
}

impl ExceptionRecorder {
    pub fn new(sink: Arc<dyn ExceptionSink>) -> Arc<Self> {
        Self::with_high_water(sink, DEFAULT_FLUSH_HIGH_WATER)
    }

    pub fn with_high_water(sink: Arc<dyn ExceptionSink>, high_water: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(Vec::new()),
            flushing: AtomicBool::new(false),
            high_water: high_water.max(1),
            sink,
        })
    }

    /// Appends a record without performing any I/O. When the queue crosses
    /// the high-water mark a background flush is spawned; the `flushing`
    /// flag keeps concurrent callers from scheduling redundant flushes.
    pub fn log(self: &Arc<Self>, record: ExceptionRecord) {
        tracing::debug!(
            block = record.block_number,
            kind = record.record_kind.map(|k| k.name()).unwrap_or("-"),
            message_type = record.message_type,
            severity = %record.severity,
            "{}",
            record.message
        );

        let queued = {
            let mut queue = self.queue.lock().expect("exception queue mutex poisoned");
            queue.push(record);
            queue.len()
        };

        if queued >= self.high_water && !self.flushing.swap(true, Ordering::SeqCst) {
            let recorder = self.clone();
            tokio::spawn(async move {
                recorder.flush_drained().await;
                recorder.flushing.store(false, Ordering::SeqCst);
            });
        }
    }

    pub fn queued(&self) -> usize {
        self.queue
            .lock()
            .expect("exception queue mutex poisoned")
            .len()
    }

    /// Drains the queue and performs bulk inserts until it is empty,
    /// regardless of the high-water mark. Called by the controller at batch
    /// boundaries and on shutdown. Unlike the background flush, this path
    /// waits out any flush already in flight, so records queued while that
    /// flush was running are not left behind.
    pub async fn force_flush(self: &Arc<Self>) {
        loop {
            if self.flushing.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(FLUSH_WAIT_INTERVAL).await;
                continue;
            }
            self.flush_drained().await;
            self.flushing.store(false, Ordering::SeqCst);
            if self.queued() == 0 {
                return;
            }
        }
    }

    async fn flush_drained(&self) {
        let drained = {
            let mut queue = self.queue.lock().expect("exception queue mutex poisoned");
            std::mem::take(&mut *queue)
        };

        if drained.is_empty() {
            return;
        }

        let count = drained.len();
        if let Err(first) = self.sink.insert(drained.clone()).await {
            tracing::warn!(count, error = %first, "exception flush failed; retrying once");
            if let Err(second) = self.sink.insert(drained).await {
                tracing::warn!(
                    count,
                    error = %second,
                    "exception flush failed twice; dropping records"
                );
            }
        }
    }
}

impl std::fmt::Debug for ExceptionRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExceptionRecorder")
            .field("queued", &self.queued())
            .field("high_water", &self.high_water)
            .finish()
    }
}
