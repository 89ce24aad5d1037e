use crate::buffer::SyncBuffer;
use crate::executor::BatchExecutor;
use crate::pipeline::job::{BatchContext, Job};
use crate::records::{LogRecord, RecordKind};
use crate::rpc::{EvmRpcClient, RpcLog};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Fetches event logs for the batch range via `eth_getLogs`, one request
/// per executor chunk of consecutive block numbers.
pub struct LogsJob {
    client: Arc<EvmRpcClient>,
    executor: BatchExecutor,
}

impl LogsJob {
    pub fn new(client: Arc<EvmRpcClient>, executor: BatchExecutor) -> Self {
        Self { client, executor }
    }
}

fn convert_log(log: &RpcLog) -> LogRecord {
    LogRecord {
        block_number: log.block_number.to::<u64>(),
        transaction_hash: log.transaction_hash,
        log_index: log.log_index.to::<u64>(),
        address: log.address,
        topics: log.topics.clone(),
        data: log.data.clone(),
        reorg: false,
    }
}

#[async_trait]
impl Job for LogsJob {
    fn name(&self) -> &'static str {
        "logs"
    }

    fn dependencies(&self) -> &'static [RecordKind] {
        &[]
    }

    fn outputs(&self) -> &'static [RecordKind] {
        &[RecordKind::Logs]
    }

    async fn collect(&self, ctx: &BatchContext, buffer: &mut SyncBuffer) -> Result<()> {
        let collector: Arc<Mutex<Vec<LogRecord>>> = Arc::new(Mutex::new(Vec::new()));

        let client = self.client.clone();
        let worker_collector = collector.clone();
        // Partitioning an ascending range yields consecutive runs, so each
        // chunk maps onto one eth_getLogs range query.
        self.executor
            .execute(ctx.block_numbers(), move |numbers: Vec<u64>| {
                let client = client.clone();
                let collector = worker_collector.clone();
                async move {
                    let first = numbers[0];
                    let last = numbers[numbers.len() - 1];
                    let logs = client.get_logs(first, last).await?;
                    let converted: Vec<LogRecord> = logs.iter().map(convert_log).collect();
                    collector
                        .lock()
                        .expect("logs collector mutex poisoned")
                        .extend(converted);
                    Ok(())
                }
            })
            .await?;

        let logs = {
            let mut guard = collector.lock().expect("logs collector mutex poisoned");
            std::mem::take(&mut *guard)
        };
        buffer.logs_mut().extend(logs);
        Ok(())
    }

    fn process(&self, _ctx: &BatchContext, buffer: &mut SyncBuffer) -> Result<()> {
        buffer
            .logs_mut()
            .sort_by_key(|log| (log.block_number, log.log_index));
        Ok(())
    }
}
