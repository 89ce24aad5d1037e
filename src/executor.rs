//! Bounded-concurrency batch work executor.
//!
//! Splits arbitrary work lists into fixed-size chunks and runs them across a
//! bounded tokio worker pool. The executor itself never performs network I/O;
//! only `worker_fn` bodies do. Chunk completion order is unspecified, so
//! callers needing order must sort after [`BatchExecutor::execute`] returns.

pub mod backoff;

use crate::rpc::RpcError;
use anyhow::{anyhow, Result};
use backoff::{retry_with_backoff, RetryBackoff, RetryDisposition};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const DEFAULT_MAX_ATTEMPTS: usize = 5;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;
const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;

#[derive(Debug, Clone)]
pub struct BatchExecutor {
    batch_size: usize,
    max_workers: usize,
    max_attempts: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
    shutdown: CancellationToken,
}

impl BatchExecutor {
    pub fn new(batch_size: usize, max_workers: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_workers: max_workers.max(1),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_retry(
        mut self,
        max_attempts: usize,
        initial_backoff: Duration,
        max_backoff: Duration,
    ) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.initial_backoff = initial_backoff;
        self.max_backoff = max_backoff;
        self
    }

    /// Races every retry backoff sleep against `token`, so a shutdown
    /// interrupts waiting chunks instead of letting them sleep out their
    /// backoff.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Partitions `items` into chunks of at most `batch_size` and invokes
    /// `worker_fn(chunk)` with at most `max_workers` chunks in flight.
    ///
    /// Transient RPC failures inside a chunk are retried with exponential
    /// backoff up to the configured attempt bound. A chunk that exhausts its
    /// retries (or fails permanently) does not cancel sibling chunks already
    /// in flight; the first error propagates once every chunk has settled.
    pub async fn execute<T, F, Fut>(&self, items: Vec<T>, worker_fn: F) -> Result<()>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(Vec<T>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.execute_chunked(partition(items, self.batch_size), worker_fn)
            .await
    }

    /// Variant of [`BatchExecutor::execute`] for callers that have already
    /// planned their own chunks (e.g. the multicall engine's size-bounded
    /// chunking), bypassing the fixed-size partitioner.
    pub async fn execute_chunked<T, F, Fut>(&self, chunks: Vec<Vec<T>>, worker_fn: F) -> Result<()>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(Vec<T>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if chunks.is_empty() {
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();

        for (chunk_id, chunk) in chunks.into_iter().enumerate() {
            if chunk.is_empty() {
                continue;
            }

            let semaphore = semaphore.clone();
            let worker_fn = worker_fn.clone();
            let retry = RetryBackoff::new(self.initial_backoff, self.max_backoff)
                .with_max_attempts(self.max_attempts)
                .with_cancellation(self.shutdown.clone());

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| anyhow!("executor semaphore closed"))?;
                run_chunk(chunk_id, chunk, worker_fn, retry).await
            });
        }

        let mut first_error: Option<anyhow::Error> = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_err) => Err(anyhow!("executor chunk task panicked: {join_err}")),
            };
            if let Err(err) = outcome {
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    tracing::debug!(error = %err, "additional chunk failure suppressed");
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn run_chunk<T, F, Fut>(
    chunk_id: usize,
    chunk: Vec<T>,
    worker_fn: F,
    retry: RetryBackoff,
) -> Result<()>
where
    T: Clone + Send + Sync,
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = Result<()>> + Send,
{
    let chunk_len = chunk.len();
    let result = retry_with_backoff(
        retry,
        |_attempt| worker_fn(chunk.clone()),
        |attempt, backoff, err, will_retry| {
            if will_retry {
                tracing::warn!(
                    chunk = chunk_id,
                    items = chunk_len,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "chunk failed; retrying"
                );
            } else {
                tracing::error!(
                    chunk = chunk_id,
                    items = chunk_len,
                    attempt,
                    error = %err,
                    "chunk exhausted retries"
                );
            }
        },
        |_, err| match err.downcast_ref::<RpcError>() {
            Some(rpc_err) if rpc_err.is_transient() => RetryDisposition::Retry,
            Some(_) => RetryDisposition::Abort,
            None => RetryDisposition::Abort,
        },
    )
    .await;

    result.map_err(|err| err.context(format!("chunk {chunk_id} ({chunk_len} items) failed")))
}

fn partition<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut current = Vec::with_capacity(batch_size.min(items.len()));
    for item in items {
        current.push(item);
        if current.len() == batch_size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(batch_size)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
