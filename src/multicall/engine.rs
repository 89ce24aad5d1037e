use crate::exceptions::{ExceptionRecord, ExceptionRecorder, Severity};
use crate::executor::BatchExecutor;
use crate::multicall::call::{decode_return, Call, CallOutput, CallReturn};
use crate::multicall::chunk::plan_chunks;
use crate::rpc::{CallRequest, EvmRpcClient};
use crate::runtime::telemetry::Telemetry;
use alloy_primitives::{address, Address, Bytes};
use alloy_sol_types::{sol, SolCall};
use anyhow::{ensure, Context, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

sol! {
    struct AggregateCall {
        address target;
        bytes callData;
    }

    struct AggregateResult {
        bool success;
        bytes returnData;
    }

    function tryAggregate(bool requireSuccess, AggregateCall[] calldata calls)
        external
        payable
        returns (AggregateResult[] memory returnData);
}

/// Canonical Multicall3 deployment address, identical on most EVM chains.
pub const MULTICALL3_ADDRESS: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

const DEFAULT_MAX_CHUNK_BYTES: usize = 250 * 1024;

#[derive(Debug, Clone)]
pub struct MulticallSettings {
    pub contract_address: Address,
    /// Calls pinned to blocks before this height bypass aggregation: the
    /// contract did not exist yet at those blocks.
    pub deploy_block: u64,
    pub enabled: bool,
    pub max_chunk_bytes: usize,
}

impl Default for MulticallSettings {
    fn default() -> Self {
        Self {
            contract_address: MULTICALL3_ADDRESS,
            deploy_block: 0,
            enabled: true,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
        }
    }
}

/// Snapshot of one pending call, cloned into a worker task.
#[derive(Debug, Clone)]
struct PlannedCall {
    index: usize,
    block: u64,
    target: Address,
    data: Bytes,
    output: CallOutput,
}

impl PlannedCall {
    fn from_call(index: usize, call: &Call) -> Self {
        Self {
            index,
            block: call.block_number(),
            target: call.target,
            data: call.data.clone(),
            output: call.output,
        }
    }
}

/// Resolves batches of block-pinned `eth_call`s, aggregating them through
/// Multicall3 `tryAggregate` where possible and falling back to batched
/// direct calls for everything left unresolved.
pub struct MulticallEngine {
    client: Arc<EvmRpcClient>,
    executor: BatchExecutor,
    settings: MulticallSettings,
    exceptions: Arc<ExceptionRecorder>,
    telemetry: Arc<Telemetry>,
}

impl MulticallEngine {
    pub fn new(
        client: Arc<EvmRpcClient>,
        executor: BatchExecutor,
        settings: MulticallSettings,
        exceptions: Arc<ExceptionRecorder>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            client,
            executor,
            settings,
            exceptions,
            telemetry,
        }
    }

    /// Resolves every call in place. Aggregation failures degrade to the
    /// direct-call pass instead of failing the batch; only a failure of the
    /// direct pass itself is returned, and that failure is retriable by the
    /// caller. Calls whose returndata cannot be decoded stay unresolved and
    /// are recorded as exceptions.
    pub async fn execute_calls(&self, calls: &mut [Call]) -> Result<()> {
        if calls.is_empty() {
            return Ok(());
        }

        let mut by_block: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
        for (index, call) in calls.iter().enumerate() {
            by_block.entry(call.block_number()).or_default().push(index);
        }

        let mut aggregate_chunks: Vec<Vec<usize>> = Vec::new();
        for (block, indices) in &by_block {
            if self.settings.enabled && *block >= self.settings.deploy_block {
                aggregate_chunks.extend(plan_chunks(calls, indices, self.settings.max_chunk_bytes));
            }
        }

        if !aggregate_chunks.is_empty() {
            self.run_aggregated(calls, aggregate_chunks).await;
        }

        let unresolved: Vec<usize> = (0..calls.len())
            .filter(|&index| !calls[index].is_resolved())
            .collect();
        if !unresolved.is_empty() {
            self.run_direct(calls, unresolved).await?;
        }

        Ok(())
    }

    async fn run_aggregated(&self, calls: &mut [Call], chunks: Vec<Vec<usize>>) {
        let chunk_count = chunks.len();
        let call_count: usize = chunks.iter().map(Vec::len).sum();
        tracing::debug!(chunks = chunk_count, calls = call_count, "running aggregated call pass");

        let planned: Vec<Vec<PlannedCall>> = chunks
            .iter()
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|&index| PlannedCall::from_call(index, &calls[index]))
                    .collect()
            })
            .collect();

        let collector: Arc<Mutex<Vec<(usize, CallReturn)>>> = Arc::new(Mutex::new(Vec::new()));
        let client = self.client.clone();
        let contract = self.settings.contract_address;
        let worker_collector = collector.clone();

        let result = self
            .executor
            .execute_chunked(planned, move |chunk: Vec<PlannedCall>| {
                let client = client.clone();
                let collector = worker_collector.clone();
                async move { aggregate_chunk(client, contract, chunk, collector).await }
            })
            .await;

        if let Err(error) = result {
            tracing::warn!(
                error = format!("{error:#}"),
                "aggregated pass incomplete; unresolved calls go to the direct pass"
            );
        }

        self.telemetry.add_multicall_chunks(chunk_count as u64);

        let resolved = {
            let mut guard = collector.lock().expect("multicall collector mutex poisoned");
            std::mem::take(&mut *guard)
        };
        for (index, value) in resolved {
            calls[index].resolve(value);
        }
    }

    /// Single direct-call pass over everything still unresolved. There is no
    /// second fallback: a call the node answers with garbage twice would
    /// answer with garbage forever.
    async fn run_direct(&self, calls: &mut [Call], unresolved: Vec<usize>) -> Result<()> {
        tracing::debug!(calls = unresolved.len(), "running direct call pass");
        self.telemetry.add_fallback_calls(unresolved.len() as u64);

        let planned: Vec<PlannedCall> = unresolved
            .iter()
            .map(|&index| PlannedCall::from_call(index, &calls[index]))
            .collect();

        let collector: Arc<Mutex<Vec<(usize, Option<Bytes>)>>> = Arc::new(Mutex::new(Vec::new()));
        let client = self.client.clone();
        let worker_collector = collector.clone();

        self.executor
            .execute(planned, move |batch: Vec<PlannedCall>| {
                let client = client.clone();
                let collector = worker_collector.clone();
                async move {
                    let requests: Vec<(CallRequest, u64)> = batch
                        .iter()
                        .map(|planned| {
                            (
                                CallRequest {
                                    to: planned.target,
                                    data: planned.data.clone(),
                                },
                                planned.block,
                            )
                        })
                        .collect();
                    let returns = client.batch_call(&requests).await?;
                    let mut resolved = Vec::with_capacity(batch.len());
                    for (planned, bytes) in batch.iter().zip(returns) {
                        resolved.push((planned.index, bytes));
                    }
                    collector
                        .lock()
                        .expect("direct call collector mutex poisoned")
                        .extend(resolved);
                    Ok(())
                }
            })
            .await
            .context("direct call pass failed")?;

        let resolved = {
            let mut guard = collector.lock().expect("direct call collector mutex poisoned");
            std::mem::take(&mut *guard)
        };
        for (index, bytes) in resolved {
            let call = &mut calls[index];
            match bytes {
                Some(bytes) => match decode_return(call.output, &bytes) {
                    Some(value) => call.resolve(value),
                    None => self.exceptions.log(ExceptionRecord {
                        block_number: call.block_number(),
                        record_kind: None,
                        message_type: "call_decode_failure",
                        message: format!(
                            "returndata from {} did not decode as {:?}",
                            call.target, call.output
                        ),
                        context: hex::encode(&bytes),
                        severity: Severity::Warning,
                    }),
                },
                None => self.exceptions.log(ExceptionRecord {
                    block_number: call.block_number(),
                    record_kind: None,
                    message_type: "call_reverted",
                    message: format!("direct call to {} reverted", call.target),
                    context: hex::encode(&call.data),
                    severity: Severity::Info,
                }),
            }
        }

        Ok(())
    }
}

async fn aggregate_chunk(
    client: Arc<EvmRpcClient>,
    contract: Address,
    chunk: Vec<PlannedCall>,
    collector: Arc<Mutex<Vec<(usize, CallReturn)>>>,
) -> Result<()> {
    let block = chunk[0].block;
    let request = tryAggregateCall {
        requireSuccess: false,
        calls: chunk
            .iter()
            .map(|planned| AggregateCall {
                target: planned.target,
                callData: planned.data.clone(),
            })
            .collect(),
    };

    let response = client
        .call(
            &CallRequest {
                to: contract,
                data: Bytes::from(request.abi_encode()),
            },
            block,
        )
        .await?;

    let decoded = tryAggregateCall::abi_decode_returns(&response, true)
        .with_context(|| format!("aggregated response for block {block} did not decode"))?;
    let results = decoded.returnData;
    ensure!(
        results.len() == chunk.len(),
        "aggregated response has {} entries for {} calls",
        results.len(),
        chunk.len()
    );

    let mut resolved = Vec::new();
    for (planned, result) in chunk.iter().zip(results) {
        if !result.success {
            tracing::debug!(
                contract = %planned.target,
                block,
                "aggregated call reported failure; deferring to direct pass"
            );
            continue;
        }
        match decode_return(planned.output, &result.returnData) {
            Some(value) => resolved.push((planned.index, value)),
            None => tracing::debug!(
                contract = %planned.target,
                block,
                "aggregated returndata did not decode; deferring to direct pass"
            ),
        }
    }

    collector
        .lock()
        .expect("multicall collector mutex poisoned")
        .extend(resolved);
    Ok(())
}
