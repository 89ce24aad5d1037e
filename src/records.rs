//! Domain record types flowing through the sync pipeline, the static
//! `RecordKind` registry, and the per-kind upsert policies the persistence
//! collaborator honours.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// Every record kind the pipeline knows about, with a manually assigned
/// stable single-byte code. Codes are part of the cross-process verification
/// surface and must never change once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Blocks,
    Transactions,
    Logs,
    TokenTransfers,
    TokenBalances,
}

impl RecordKind {
    pub const ALL: [RecordKind; 5] = [
        RecordKind::Blocks,
        RecordKind::Transactions,
        RecordKind::Logs,
        RecordKind::TokenTransfers,
        RecordKind::TokenBalances,
    ];

    /// Stable identity name used in logs, exception records, and exports.
    pub const fn name(&self) -> &'static str {
        match self {
            RecordKind::Blocks => "blocks",
            RecordKind::Transactions => "transactions",
            RecordKind::Logs => "logs",
            RecordKind::TokenTransfers => "token_transfers",
            RecordKind::TokenBalances => "token_balances",
        }
    }

    /// Statically assigned short code. Uniqueness is asserted by a test
    /// rather than derived from any runtime hashing.
    pub const fn stable_code(&self) -> u8 {
        match self {
            RecordKind::Blocks => b'B',
            RecordKind::Transactions => b'T',
            RecordKind::Logs => b'L',
            RecordKind::TokenTransfers => b'X',
            RecordKind::TokenBalances => b'A',
        }
    }

    /// Conflict-resolution rule applied by the persistence collaborator.
    pub const fn upsert_policy(&self) -> UpsertPolicy {
        match self {
            RecordKind::Blocks => UpsertPolicy::ReplaceIfNewer,
            RecordKind::Transactions => UpsertPolicy::InsertOnly,
            RecordKind::Logs => UpsertPolicy::InsertOnly,
            RecordKind::TokenTransfers => UpsertPolicy::InsertOnly,
            RecordKind::TokenBalances => UpsertPolicy::ReplaceIfNewer,
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared, not hard-coded: how a conflicting write against an existing live
/// row is resolved.
///
/// A conflicting row already marked `reorg = true` is always superseded
/// regardless of policy; that is what makes re-derivation idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertPolicy {
    /// Immutable record kinds: a conflicting live row wins, the candidate is
    /// dropped.
    InsertOnly,
    /// The candidate replaces the stored row when
    /// `candidate.block_number >= stored.block_number`, so an out-of-order
    /// late write never overwrites newer data.
    ReplaceIfNewer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: u64,
    pub gas_used: u64,
    pub transaction_count: usize,
    pub reorg: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: B256,
    pub block_number: u64,
    pub transaction_index: u64,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub reorg: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub reorg: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransferRecord {
    pub block_number: u64,
    pub log_index: u64,
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub reorg: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalanceRecord {
    pub block_number: u64,
    pub token: Address,
    pub holder: Address,
    pub balance: U256,
    pub reorg: bool,
}

/// Type-erased record used at the persistence seam. The pipeline itself only
/// ever works with the typed slices in [`crate::buffer::SyncBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Block(BlockRecord),
    Transaction(TransactionRecord),
    Log(LogRecord),
    TokenTransfer(TokenTransferRecord),
    TokenBalance(TokenBalanceRecord),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Block(_) => RecordKind::Blocks,
            Record::Transaction(_) => RecordKind::Transactions,
            Record::Log(_) => RecordKind::Logs,
            Record::TokenTransfer(_) => RecordKind::TokenTransfers,
            Record::TokenBalance(_) => RecordKind::TokenBalances,
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            Record::Block(r) => r.number,
            Record::Transaction(r) => r.block_number,
            Record::Log(r) => r.block_number,
            Record::TokenTransfer(r) => r.block_number,
            Record::TokenBalance(r) => r.block_number,
        }
    }

    /// Natural key identifying the row independently of which fork produced
    /// it.
    pub fn natural_key(&self) -> String {
        match self {
            Record::Block(r) => format!("{}", r.number),
            Record::Transaction(r) => format!("{}", r.hash),
            Record::Log(r) => format!("{}:{}", r.block_number, r.log_index),
            Record::TokenTransfer(r) => format!("{}:{}", r.block_number, r.log_index),
            Record::TokenBalance(r) => format!("{}:{}", r.token, r.holder),
        }
    }

    pub fn reorg(&self) -> bool {
        match self {
            Record::Block(r) => r.reorg,
            Record::Transaction(r) => r.reorg,
            Record::Log(r) => r.reorg,
            Record::TokenTransfer(r) => r.reorg,
            Record::TokenBalance(r) => r.reorg,
        }
    }

    pub fn set_reorg(&mut self, reorg: bool) {
        match self {
            Record::Block(r) => r.reorg = reorg,
            Record::Transaction(r) => r.reorg = reorg,
            Record::Log(r) => r.reorg = reorg,
            Record::TokenTransfer(r) => r.reorg = reorg,
            Record::TokenBalance(r) => r.reorg = reorg,
        }
    }
}
