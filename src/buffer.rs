//! Per-batch shared buffer passed between pipeline jobs.
//!
//! The buffer holds one typed, ordered slice per [`RecordKind`]. A job may
//! only read the kinds it declares as dependencies and only write the kinds
//! it declares as outputs; the dispatcher's topological ordering guarantees a
//! single writer per kind at any time. Skipped jobs leave their kinds empty,
//! so downstream code always sees an empty slice rather than a missing key.

use crate::records::{
    BlockRecord, LogRecord, Record, RecordKind, TokenBalanceRecord, TokenTransferRecord,
    TransactionRecord,
};

#[derive(Debug, Default)]
pub struct SyncBuffer {
    blocks: Vec<BlockRecord>,
    transactions: Vec<TransactionRecord>,
    logs: Vec<LogRecord>,
    token_transfers: Vec<TokenTransferRecord>,
    token_balances: Vec<TokenBalanceRecord>,
}

impl SyncBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks(&self) -> &[BlockRecord] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut Vec<BlockRecord> {
        &mut self.blocks
    }

    pub fn transactions(&self) -> &[TransactionRecord] {
        &self.transactions
    }

    pub fn transactions_mut(&mut self) -> &mut Vec<TransactionRecord> {
        &mut self.transactions
    }

    pub fn logs(&self) -> &[LogRecord] {
        &self.logs
    }

    pub fn logs_mut(&mut self) -> &mut Vec<LogRecord> {
        &mut self.logs
    }

    pub fn token_transfers(&self) -> &[TokenTransferRecord] {
        &self.token_transfers
    }

    pub fn token_transfers_mut(&mut self) -> &mut Vec<TokenTransferRecord> {
        &mut self.token_transfers
    }

    pub fn token_balances(&self) -> &[TokenBalanceRecord] {
        &self.token_balances
    }

    pub fn token_balances_mut(&mut self) -> &mut Vec<TokenBalanceRecord> {
        &mut self.token_balances
    }

    pub fn len(&self, kind: RecordKind) -> usize {
        match kind {
            RecordKind::Blocks => self.blocks.len(),
            RecordKind::Transactions => self.transactions.len(),
            RecordKind::Logs => self.logs.len(),
            RecordKind::TokenTransfers => self.token_transfers.len(),
            RecordKind::TokenBalances => self.token_balances.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        RecordKind::ALL.iter().all(|kind| self.len(*kind) == 0)
    }

    pub fn total_records(&self) -> usize {
        RecordKind::ALL.iter().map(|kind| self.len(*kind)).sum()
    }

    /// Flattens the typed slices into type-erased records for the requested
    /// kinds, in kind order, preserving insertion order within each kind.
    pub fn drain_records(self, kinds: &[RecordKind]) -> Vec<Record> {
        let mut out = Vec::with_capacity(self.total_records());
        for kind in RecordKind::ALL {
            if !kinds.contains(&kind) {
                continue;
            }
            match kind {
                RecordKind::Blocks => out.extend(self.blocks.iter().cloned().map(Record::Block)),
                RecordKind::Transactions => {
                    out.extend(self.transactions.iter().cloned().map(Record::Transaction))
                }
                RecordKind::Logs => out.extend(self.logs.iter().cloned().map(Record::Log)),
                RecordKind::TokenTransfers => out.extend(
                    self.token_transfers
                        .iter()
                        .cloned()
                        .map(Record::TokenTransfer),
                ),
                RecordKind::TokenBalances => out.extend(
                    self.token_balances
                        .iter()
                        .cloned()
                        .map(Record::TokenBalance),
                ),
            }
        }
        out
    }

    /// Hash of the highest block collected in this batch, used by the
    /// controller to seed the reorg check.
    pub fn last_block_hash(&self) -> Option<(u64, alloy_primitives::B256)> {
        self.blocks
            .iter()
            .max_by_key(|block| block.number)
            .map(|block| (block.number, block.hash))
    }
}
