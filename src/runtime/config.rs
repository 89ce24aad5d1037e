use crate::multicall::MULTICALL3_ADDRESS;
use crate::records::RecordKind;
use crate::rpc::options::DEFAULT_HTTP_BODY_LIMIT_BYTES;
use crate::runtime::telemetry;
use alloy_primitives::Address;
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;
const DEFAULT_REORG_WINDOW: u64 = 32;
const DEFAULT_MULTICALL_MAX_CHUNK_BYTES: usize = 250 * 1024;

/// Runtime configuration for the sync engine.
///
/// All instances must be constructed via [`SyncConfig::builder`] or
/// [`SyncConfig::new`] so invariants are validated before any consumer
/// observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    rpc_url: String,
    worker_count: usize,
    rpc_batch_size: usize,
    block_batch_size: u64,
    start_block: u64,
    requested_kinds: Vec<RecordKind>,
    poll_interval: Duration,
    rpc_timeout: Duration,
    metrics_interval: Duration,
    reorg_check: bool,
    reorg_window: u64,
    multicall_enabled: bool,
    multicall_address: Address,
    multicall_deploy_block: u64,
    multicall_max_chunk_bytes: usize,
    rpc_max_request_body_bytes: usize,
    rpc_max_response_body_bytes: usize,
    cursor_path: Option<PathBuf>,
}

pub struct SyncConfigParams {
    pub rpc_url: String,
    pub worker_count: usize,
    pub rpc_batch_size: usize,
    pub block_batch_size: u64,
    pub start_block: u64,
    pub requested_kinds: Vec<RecordKind>,
    pub poll_interval: Duration,
    pub rpc_timeout: Duration,
    pub metrics_interval: Duration,
    pub reorg_check: bool,
    pub reorg_window: u64,
    pub multicall_enabled: bool,
    pub multicall_address: Address,
    pub multicall_deploy_block: u64,
    pub multicall_max_chunk_bytes: usize,
    pub rpc_max_request_body_bytes: usize,
    pub rpc_max_response_body_bytes: usize,
    pub cursor_path: Option<PathBuf>,
}

impl SyncConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    ///
    /// Prefer [`SyncConfig::builder`] for ergonomics when many values use defaults.
    pub fn new(params: SyncConfigParams) -> Result<Self> {
        let SyncConfigParams {
            rpc_url,
            worker_count,
            rpc_batch_size,
            block_batch_size,
            start_block,
            requested_kinds,
            poll_interval,
            rpc_timeout,
            metrics_interval,
            reorg_check,
            reorg_window,
            multicall_enabled,
            multicall_address,
            multicall_deploy_block,
            multicall_max_chunk_bytes,
            rpc_max_request_body_bytes,
            rpc_max_response_body_bytes,
            cursor_path,
        } = params;

        let config = Self {
            rpc_url: rpc_url.trim().to_owned(),
            worker_count,
            rpc_batch_size,
            block_batch_size,
            start_block,
            requested_kinds,
            poll_interval,
            rpc_timeout,
            metrics_interval,
            reorg_check,
            reorg_window,
            multicall_enabled,
            multicall_address,
            multicall_deploy_block,
            multicall_max_chunk_bytes,
            rpc_max_request_body_bytes,
            rpc_max_response_body_bytes,
            cursor_path,
        };

        config.validate()?;
        Ok(config)
    }

    /// Full RPC URL (including scheme).
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Number of concurrent workers in the batch executor.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Items per executor chunk (blocks per batched RPC, calls per batch).
    pub fn rpc_batch_size(&self) -> usize {
        self.rpc_batch_size
    }

    /// Upper bound on blocks per sync batch.
    pub fn block_batch_size(&self) -> u64 {
        self.block_batch_size
    }

    /// First block to sync when no cursor exists.
    pub fn start_block(&self) -> u64 {
        self.start_block
    }

    /// Record kinds the pipeline must produce and export.
    pub fn requested_kinds(&self) -> &[RecordKind] {
        &self.requested_kinds
    }

    /// Sleep between polls once caught up with the head.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Per-RPC timeout applied to the JSON-RPC client.
    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Whether the controller verifies the synced tip against the chain.
    pub fn reorg_check(&self) -> bool {
        self.reorg_check
    }

    /// Maximum depth of the fork-point walk.
    pub fn reorg_window(&self) -> u64 {
        self.reorg_window
    }

    pub fn multicall_enabled(&self) -> bool {
        self.multicall_enabled
    }

    pub fn multicall_address(&self) -> Address {
        self.multicall_address
    }

    pub fn multicall_deploy_block(&self) -> u64 {
        self.multicall_deploy_block
    }

    /// Serialized-size ceiling for one aggregated call chunk.
    pub fn multicall_max_chunk_bytes(&self) -> usize {
        self.multicall_max_chunk_bytes
    }

    /// Maximum allowed HTTP request body bytes for RPC calls.
    pub fn rpc_max_request_body_bytes(&self) -> usize {
        self.rpc_max_request_body_bytes
    }

    /// Maximum allowed HTTP response body bytes for RPC calls.
    pub fn rpc_max_response_body_bytes(&self) -> usize {
        self.rpc_max_response_body_bytes
    }

    /// Cursor file location; `None` keeps the cursor in memory.
    pub fn cursor_path(&self) -> Option<&PathBuf> {
        self.cursor_path.as_ref()
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        let url = self.rpc_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("rpc_url must start with http:// or https://");
        }

        if self.worker_count == 0 {
            bail!("worker_count must be greater than 0");
        }

        if self.rpc_batch_size == 0 {
            bail!("rpc_batch_size must be greater than 0");
        }

        if self.block_batch_size == 0 {
            bail!("block_batch_size must be greater than 0");
        }

        if self.requested_kinds.is_empty() {
            bail!("requested_kinds cannot be empty");
        }

        let mut seen = HashSet::new();
        for kind in &self.requested_kinds {
            if !seen.insert(kind) {
                bail!("requested_kinds lists '{kind}' more than once");
            }
        }

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be greater than 0");
        }

        if self.rpc_timeout.is_zero() {
            bail!("rpc_timeout must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if self.reorg_check && self.reorg_window == 0 {
            bail!("reorg_window must be greater than 0 when reorg_check is enabled");
        }

        if self.multicall_max_chunk_bytes == 0 {
            bail!("multicall_max_chunk_bytes must be greater than 0");
        }

        if self.rpc_max_request_body_bytes == 0 {
            bail!("rpc_max_request_body_bytes must be greater than 0");
        }

        if self.rpc_max_response_body_bytes == 0 {
            bail!("rpc_max_response_body_bytes must be greater than 0");
        }

        if self.multicall_max_chunk_bytes > self.rpc_max_request_body_bytes {
            bail!(
                "multicall_max_chunk_bytes ({}) cannot exceed rpc_max_request_body_bytes ({})",
                self.multicall_max_chunk_bytes,
                self.rpc_max_request_body_bytes,
            );
        }

        if self.multicall_enabled && self.multicall_address == Address::ZERO {
            bail!("multicall_address cannot be the zero address when multicall is enabled");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct SyncConfigBuilder {
    rpc_url: Option<String>,
    worker_count: Option<usize>,
    rpc_batch_size: Option<usize>,
    block_batch_size: Option<u64>,
    start_block: Option<u64>,
    requested_kinds: Option<Vec<RecordKind>>,
    poll_interval: Option<Duration>,
    rpc_timeout: Option<Duration>,
    metrics_interval: Option<Duration>,
    reorg_check: Option<bool>,
    reorg_window: Option<u64>,
    multicall_enabled: Option<bool>,
    multicall_address: Option<Address>,
    multicall_deploy_block: Option<u64>,
    multicall_max_chunk_bytes: Option<usize>,
    rpc_max_request_body_bytes: Option<usize>,
    rpc_max_response_body_bytes: Option<usize>,
    cursor_path: Option<PathBuf>,
}

impl SyncConfigBuilder {
    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = Some(url.into());
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    pub fn rpc_batch_size(mut self, size: usize) -> Self {
        self.rpc_batch_size = Some(size);
        self
    }

    pub fn block_batch_size(mut self, size: u64) -> Self {
        self.block_batch_size = Some(size);
        self
    }

    pub fn start_block(mut self, block: u64) -> Self {
        self.start_block = Some(block);
        self
    }

    pub fn requested_kinds(mut self, kinds: impl Into<Vec<RecordKind>>) -> Self {
        self.requested_kinds = Some(kinds.into());
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn reorg_check(mut self, enabled: bool) -> Self {
        self.reorg_check = Some(enabled);
        self
    }

    pub fn reorg_window(mut self, window: u64) -> Self {
        self.reorg_window = Some(window);
        self
    }

    pub fn multicall_enabled(mut self, enabled: bool) -> Self {
        self.multicall_enabled = Some(enabled);
        self
    }

    pub fn multicall_address(mut self, address: Address) -> Self {
        self.multicall_address = Some(address);
        self
    }

    pub fn multicall_deploy_block(mut self, block: u64) -> Self {
        self.multicall_deploy_block = Some(block);
        self
    }

    pub fn multicall_max_chunk_bytes(mut self, bytes: usize) -> Self {
        self.multicall_max_chunk_bytes = Some(bytes);
        self
    }

    pub fn rpc_max_request_body_bytes(mut self, bytes: usize) -> Self {
        self.rpc_max_request_body_bytes = Some(bytes);
        self
    }

    pub fn rpc_max_response_body_bytes(mut self, bytes: usize) -> Self {
        self.rpc_max_response_body_bytes = Some(bytes);
        self
    }

    pub fn cursor_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cursor_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<SyncConfig> {
        let params = SyncConfigParams {
            rpc_url: self.rpc_url.context("rpc_url is required")?,
            worker_count: self.worker_count.context("worker_count is required")?,
            rpc_batch_size: self.rpc_batch_size.context("rpc_batch_size is required")?,
            block_batch_size: self
                .block_batch_size
                .context("block_batch_size is required")?,
            start_block: self.start_block.context("start_block is required")?,
            requested_kinds: self
                .requested_kinds
                .unwrap_or_else(|| RecordKind::ALL.to_vec()),
            poll_interval: self
                .poll_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)),
            rpc_timeout: self
                .rpc_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            reorg_check: self.reorg_check.unwrap_or(true),
            reorg_window: self.reorg_window.unwrap_or(DEFAULT_REORG_WINDOW),
            multicall_enabled: self.multicall_enabled.unwrap_or(true),
            multicall_address: self.multicall_address.unwrap_or(MULTICALL3_ADDRESS),
            multicall_deploy_block: self.multicall_deploy_block.unwrap_or(0),
            multicall_max_chunk_bytes: self
                .multicall_max_chunk_bytes
                .unwrap_or(DEFAULT_MULTICALL_MAX_CHUNK_BYTES),
            rpc_max_request_body_bytes: self
                .rpc_max_request_body_bytes
                .unwrap_or(DEFAULT_HTTP_BODY_LIMIT_BYTES),
            rpc_max_response_body_bytes: self
                .rpc_max_response_body_bytes
                .unwrap_or(DEFAULT_HTTP_BODY_LIMIT_BYTES),
            cursor_path: self.cursor_path,
        };

        SyncConfig::new(params)
    }
}
