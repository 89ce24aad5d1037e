//! Persistence seam. The pipeline talks to a [`RecordStore`] trait; the
//! in-memory implementation backs tests and the default wiring, and encodes
//! the conflict-resolution rules every real backend must honour.

use crate::records::{Record, RecordKind, UpsertPolicy};
use alloy_primitives::B256;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Durable destination for synced records.
///
/// Implementations must resolve conflicting writes by natural key according
/// to the kind's [`UpsertPolicy`], with one override: a stored row already
/// marked `reorg = true` is always superseded by the candidate. Without that
/// override, re-deriving a reorged range could never resurrect rows for
/// `InsertOnly` kinds.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn upsert(&self, records: &[Record]) -> anyhow::Result<usize>;

    /// Flags every stored row at or above `from_block` as reorged. Step one
    /// of the reorg repair protocol.
    async fn mark_reorged(&self, from_block: u64) -> anyhow::Result<usize>;

    /// Deletes every row still flagged as reorged. Step three of the repair
    /// protocol, run only after re-derivation has resurrected the canonical
    /// rows.
    async fn sweep_reorged(&self) -> anyhow::Result<usize>;

    /// Hash of the stored block row at `number`, if any. Used by the
    /// controller's fork-point walk.
    async fn stored_block_hash(&self, number: u64) -> anyhow::Result<Option<B256>>;
}

type RowKey = (RecordKind, String);

/// HashMap-backed store keyed by `(kind, natural_key)`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<RowKey, Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().expect("store mutex poisoned").len()
    }

    pub fn rows_of_kind(&self, kind: RecordKind) -> Vec<Record> {
        let rows = self.rows.lock().expect("store mutex poisoned");
        let mut out: Vec<Record> = rows
            .values()
            .filter(|record| record.kind() == kind)
            .cloned()
            .collect();
        out.sort_by_key(|record| (record.block_number(), record.natural_key()));
        out
    }

    pub fn get(&self, kind: RecordKind, natural_key: &str) -> Option<Record> {
        self.rows
            .lock()
            .expect("store mutex poisoned")
            .get(&(kind, natural_key.to_string()))
            .cloned()
    }
}

fn supersedes(stored: &Record, candidate: &Record) -> bool {
    if stored.reorg() {
        return true;
    }
    match candidate.kind().upsert_policy() {
        UpsertPolicy::InsertOnly => false,
        UpsertPolicy::ReplaceIfNewer => candidate.block_number() >= stored.block_number(),
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert(&self, records: &[Record]) -> anyhow::Result<usize> {
        let mut rows = self.rows.lock().expect("store mutex poisoned");
        let mut written = 0usize;
        for record in records {
            let key = (record.kind(), record.natural_key());
            match rows.get(&key) {
                Some(stored) if !supersedes(stored, record) => {}
                _ => {
                    rows.insert(key, record.clone());
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    async fn mark_reorged(&self, from_block: u64) -> anyhow::Result<usize> {
        let mut rows = self.rows.lock().expect("store mutex poisoned");
        let mut marked = 0usize;
        for record in rows.values_mut() {
            if record.block_number() >= from_block && !record.reorg() {
                record.set_reorg(true);
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn sweep_reorged(&self) -> anyhow::Result<usize> {
        let mut rows = self.rows.lock().expect("store mutex poisoned");
        let before = rows.len();
        rows.retain(|_, record| !record.reorg());
        Ok(before - rows.len())
    }

    async fn stored_block_hash(&self, number: u64) -> anyhow::Result<Option<B256>> {
        let rows = self.rows.lock().expect("store mutex poisoned");
        match rows.get(&(RecordKind::Blocks, number.to_string())) {
            Some(Record::Block(block)) if !block.reorg => Ok(Some(block.hash)),
            _ => Ok(None),
        }
    }
}
