//! RPC client implementation for EVM nodes. Houses the `EvmRpcClient`, the
//! `RpcError` taxonomy consumed by the batch executor's retry logic, and the
//! batched JSON-RPC plumbing shared by every pipeline job.

use crate::rpc::metrics::{RpcMetrics, RpcMetricsSnapshot};
use crate::rpc::options::RpcClientOptions;
use crate::rpc::types::{block_tag, CallRequest, LogFilter, RpcBlock, RpcLog};
use alloy_primitives::{Bytes, U64};
use anyhow::{anyhow, bail, Context, Result};
use jsonrpsee::core::{
    client::{ClientT, Error as JsonRpcError},
    params::BatchRequestBuilder,
};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use jsonrpsee::types::ErrorObject;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{timeout, Instant};

/// Faults the retry machinery must discriminate. Everything else is treated
/// as permanent and surfaces through `anyhow` context chains.
#[derive(Debug)]
pub enum RpcError {
    Timeout { method: &'static str },
    Transient { method: &'static str, code: i32 },
    MissingBlock { number: u64 },
}

impl RpcError {
    /// Whether the batch executor should retry the failed chunk.
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Timeout { .. } | RpcError::Transient { .. })
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Timeout { method } => write!(f, "rpc method {method} timed out"),
            RpcError::Transient { method, code } => {
                write!(f, "rpc method {method} failed transiently (code={code})")
            }
            RpcError::MissingBlock { number } => {
                write!(f, "block {number} is not available on the node")
            }
        }
    }
}

impl std::error::Error for RpcError {}

#[derive(Debug, Clone)]
pub struct EvmRpcClient {
    rpc_url: Arc<String>,
    client: HttpClient,
    options: RpcClientOptions,
    metrics: Arc<RpcMetrics>,
}

impl EvmRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_options(url, RpcClientOptions::default())
    }

    pub fn with_options(url: impl Into<String>, options: RpcClientOptions) -> Result<Self> {
        options.validate()?;

        let rpc_url = url.into();
        let max_request_body_size = options.max_request_body_bytes.min(u32::MAX as usize) as u32;
        let max_response_body_size = options.max_response_body_bytes.min(u32::MAX as usize) as u32;

        let client = HttpClientBuilder::default()
            .request_timeout(options.request_timeout)
            .max_concurrent_requests(options.max_concurrent_requests)
            .max_request_size(max_request_body_size)
            .max_response_size(max_response_body_size)
            .build(&rpc_url)
            .map_err(|err| anyhow!("failed to build RPC client: {err}"))?;

        Ok(Self {
            rpc_url: Arc::new(rpc_url),
            client,
            options,
            metrics: Arc::new(RpcMetrics::default()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.rpc_url
    }

    pub fn metrics(&self) -> RpcMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Current head block number (`eth_blockNumber`).
    pub async fn head_block_number(&self) -> Result<u64> {
        const METHOD: &str = "eth_blockNumber";
        let number: U64 = self
            .measure(METHOD, self.client.request(METHOD, rpc_params![]))
            .await?;
        Ok(number.to::<u64>())
    }

    /// Fetches the header of one block, `None` when the node does not know
    /// the number (used by the reorg check against a possibly shrunk chain).
    pub async fn get_block_header(&self, number: u64) -> Result<Option<RpcBlock>> {
        const METHOD: &str = "eth_getBlockByNumber";
        self.measure(
            METHOD,
            self.client
                .request(METHOD, rpc_params![block_tag(number), false]),
        )
        .await
    }

    /// Fetches full blocks (with transaction objects) for a list of numbers
    /// in one batched JSON-RPC round-trip, preserving request order.
    pub async fn batch_get_blocks(&self, numbers: &[u64]) -> Result<Vec<RpcBlock>> {
        const METHOD: &str = "eth_getBlockByNumber";
        if numbers.is_empty() {
            return Ok(Vec::new());
        }

        let mut batch = BatchRequestBuilder::new();
        for number in numbers {
            batch
                .insert(METHOD, rpc_params![block_tag(*number), true])
                .context("failed to serialize eth_getBlockByNumber params")?;
        }

        let entries: Vec<Option<RpcBlock>> = self.execute_batch(batch, METHOD).await?;
        if entries.len() != numbers.len() {
            bail!(
                "RPC returned mismatched block count (expected {}, got {})",
                numbers.len(),
                entries.len()
            );
        }

        let mut blocks = Vec::with_capacity(entries.len());
        for (number, entry) in numbers.iter().zip(entries) {
            match entry {
                Some(block) => blocks.push(block),
                None => return Err(RpcError::MissingBlock { number: *number }.into()),
            }
        }
        Ok(blocks)
    }

    /// All logs emitted in `[from_block, to_block]` (`eth_getLogs`).
    pub async fn get_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RpcLog>> {
        const METHOD: &str = "eth_getLogs";
        self.measure(
            METHOD,
            self.client
                .request(METHOD, rpc_params![LogFilter::for_range(from_block, to_block)]),
        )
        .await
    }

    /// Single read-only contract call at a specific block.
    pub async fn call(&self, request: &CallRequest, block_number: u64) -> Result<Bytes> {
        const METHOD: &str = "eth_call";
        self.measure(
            METHOD,
            self.client
                .request(METHOD, rpc_params![request.clone(), block_tag(block_number)]),
        )
        .await
    }

    /// Batched `eth_call`. Per-entry node errors (reverts, gas estimation
    /// failures) resolve to `None` so the caller can treat the call as
    /// unresolved rather than failing the whole batch; transport faults fail
    /// the batch and are classified for retry.
    pub async fn batch_call(&self, calls: &[(CallRequest, u64)]) -> Result<Vec<Option<Bytes>>> {
        const METHOD: &str = "eth_call";
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let mut batch = BatchRequestBuilder::new();
        for (request, block_number) in calls {
            batch
                .insert(METHOD, rpc_params![request.clone(), block_tag(*block_number)])
                .context("failed to serialize eth_call params")?;
        }

        let start = Instant::now();
        let response = match timeout(
            self.options.request_timeout,
            self.client.batch_request::<Bytes>(batch),
        )
        .await
        {
            Err(_) => {
                self.metrics.record_timeout(start.elapsed());
                return Err(RpcError::Timeout { method: METHOD }.into());
            }
            Ok(Err(err)) => {
                self.metrics.record_failure(start.elapsed());
                return Err(map_rpc_error(METHOD, err));
            }
            Ok(Ok(response)) => {
                self.metrics.record_success(start.elapsed());
                response
            }
        };

        let mut results = Vec::with_capacity(calls.len());
        for (idx, entry) in response.into_iter().enumerate() {
            match entry {
                Ok(bytes) => results.push(Some(bytes)),
                Err(err) => {
                    tracing::debug!(
                        index = idx,
                        code = err.code(),
                        message = err.message(),
                        "eth_call batch entry failed; leaving call unresolved"
                    );
                    results.push(None);
                }
            }
        }

        if results.len() != calls.len() {
            bail!(
                "RPC returned mismatched eth_call count (expected {}, got {})",
                calls.len(),
                results.len()
            );
        }
        Ok(results)
    }

    async fn execute_batch<R>(
        &self,
        batch: BatchRequestBuilder<'_>,
        label: &'static str,
    ) -> Result<Vec<R>>
    where
        R: DeserializeOwned + std::fmt::Debug + 'static,
    {
        let start = Instant::now();
        let response = match timeout(
            self.options.request_timeout,
            self.client.batch_request(batch),
        )
        .await
        {
            Err(_) => {
                self.metrics.record_timeout(start.elapsed());
                return Err(RpcError::Timeout { method: label }.into());
            }
            Ok(Err(err)) => {
                self.metrics.record_failure(start.elapsed());
                return Err(map_rpc_error(label, err));
            }
            Ok(Ok(response)) => {
                self.metrics.record_success(start.elapsed());
                response
            }
        };

        let mut values = Vec::with_capacity(response.len());
        for entry in response {
            match entry {
                Ok(value) => values.push(value),
                Err(err) => return Err(map_rpc_batch_error(label, &err)),
            }
        }

        tracing::debug!(
            method = label,
            count = values.len(),
            "batch RPC call completed"
        );

        Ok(values)
    }

    async fn measure<T>(
        &self,
        method: &'static str,
        fut: impl Future<Output = Result<T, JsonRpcError>>,
    ) -> Result<T> {
        let start = Instant::now();
        match timeout(self.options.request_timeout, fut).await {
            Err(_) => {
                self.metrics.record_timeout(start.elapsed());
                Err(RpcError::Timeout { method }.into())
            }
            Ok(Err(err)) => {
                self.metrics.record_failure(start.elapsed());
                Err(map_rpc_error(method, err))
            }
            Ok(Ok(value)) => {
                self.metrics.record_success(start.elapsed());
                Ok(value)
            }
        }
    }
}

fn map_rpc_error(label: &'static str, err: JsonRpcError) -> anyhow::Error {
    match err {
        JsonRpcError::RequestTimeout => RpcError::Timeout { method: label }.into(),
        JsonRpcError::Transport(inner) => anyhow::Error::from(RpcError::Transient {
            method: label,
            code: 0,
        })
        .context(format!("transport failure during {label}: {inner}")),
        JsonRpcError::Call(err_obj) if is_transient_code(err_obj.code()) => RpcError::Transient {
            method: label,
            code: err_obj.code(),
        }
        .into(),
        other => anyhow!("rpc {label} call failed: {other}"),
    }
}

fn map_rpc_batch_error(label: &str, err: &ErrorObject<'_>) -> anyhow::Error {
    if is_transient_code(err.code()) {
        return anyhow::Error::from(RpcError::Transient {
            method: "batch",
            code: err.code(),
        })
        .context(format!("rpc {label} batch entry failed: {}", err.message()));
    }
    anyhow!(
        "rpc {label} call failed (code={}, message={})",
        err.code(),
        err.message()
    )
}

/// JSON-RPC server errors (-32000..-32099), internal errors, and rate limits
/// are worth retrying with the same parameters.
fn is_transient_code(code: i32) -> bool {
    matches!(code, -32099..=-32000 | -32603 | 429)
}
