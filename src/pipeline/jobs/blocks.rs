use crate::buffer::SyncBuffer;
use crate::executor::BatchExecutor;
use crate::pipeline::job::{BatchContext, Job};
use crate::records::{BlockRecord, RecordKind, TransactionRecord};
use crate::rpc::{EvmRpcClient, RpcBlock};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Fetches full block bodies for the batch range and emits block and
/// transaction records.
pub struct BlocksJob {
    client: Arc<EvmRpcClient>,
    executor: BatchExecutor,
}

impl BlocksJob {
    pub fn new(client: Arc<EvmRpcClient>, executor: BatchExecutor) -> Self {
        Self { client, executor }
    }
}

fn convert_block(block: &RpcBlock) -> (BlockRecord, Vec<TransactionRecord>) {
    let number = block.number.to::<u64>();
    let transactions: Vec<TransactionRecord> = block
        .transactions
        .as_full()
        .iter()
        .map(|tx| TransactionRecord {
            hash: tx.hash,
            block_number: number,
            transaction_index: tx
                .transaction_index
                .map(|index| index.to::<u64>())
                .unwrap_or_default(),
            from: tx.from,
            to: tx.to,
            value: tx.value,
            input: tx.input.clone(),
            reorg: false,
        })
        .collect();

    let record = BlockRecord {
        number,
        hash: block.hash,
        parent_hash: block.parent_hash,
        timestamp: block.timestamp.to::<u64>(),
        gas_used: block.gas_used.to::<u64>(),
        transaction_count: block.transactions.len(),
        reorg: false,
    };

    (record, transactions)
}

#[async_trait]
impl Job for BlocksJob {
    fn name(&self) -> &'static str {
        "blocks"
    }

    fn dependencies(&self) -> &'static [RecordKind] {
        &[]
    }

    fn outputs(&self) -> &'static [RecordKind] {
        &[RecordKind::Blocks, RecordKind::Transactions]
    }

    async fn collect(&self, ctx: &BatchContext, buffer: &mut SyncBuffer) -> Result<()> {
        type Collected = (Vec<BlockRecord>, Vec<TransactionRecord>);
        let collector: Arc<Mutex<Collected>> = Arc::new(Mutex::new((Vec::new(), Vec::new())));

        let client = self.client.clone();
        let worker_collector = collector.clone();
        self.executor
            .execute(ctx.block_numbers(), move |numbers: Vec<u64>| {
                let client = client.clone();
                let collector = worker_collector.clone();
                async move {
                    let blocks = client.batch_get_blocks(&numbers).await?;
                    let mut converted: Vec<(BlockRecord, Vec<TransactionRecord>)> =
                        blocks.iter().map(convert_block).collect();
                    let mut guard = collector.lock().expect("blocks collector mutex poisoned");
                    for (block, transactions) in converted.drain(..) {
                        guard.0.push(block);
                        guard.1.extend(transactions);
                    }
                    Ok(())
                }
            })
            .await?;

        let (blocks, transactions) = {
            let mut guard = collector.lock().expect("blocks collector mutex poisoned");
            (std::mem::take(&mut guard.0), std::mem::take(&mut guard.1))
        };
        buffer.blocks_mut().extend(blocks);
        buffer.transactions_mut().extend(transactions);
        Ok(())
    }

    /// Chunks complete out of order; restore block order before downstream
    /// jobs and the exporter see the buffer.
    fn process(&self, _ctx: &BatchContext, buffer: &mut SyncBuffer) -> Result<()> {
        buffer.blocks_mut().sort_by_key(|block| block.number);
        buffer
            .transactions_mut()
            .sort_by_key(|tx| (tx.block_number, tx.transaction_index));
        Ok(())
    }
}
