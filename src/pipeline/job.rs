use crate::buffer::SyncBuffer;
use crate::records::RecordKind;
use anyhow::Result;
use async_trait::async_trait;

/// Immutable description of the block range a batch covers.
#[derive(Debug, Clone, Copy)]
pub struct BatchContext {
    pub first_block: u64,
    pub last_block: u64,
    /// True when this batch re-derives a range invalidated by a reorg.
    pub reorg: bool,
}

impl BatchContext {
    pub fn new(first_block: u64, last_block: u64) -> Self {
        Self {
            first_block,
            last_block,
            reorg: false,
        }
    }

    pub fn for_reorg(first_block: u64, last_block: u64) -> Self {
        Self {
            first_block,
            last_block,
            reorg: true,
        }
    }

    pub fn block_numbers(&self) -> Vec<u64> {
        (self.first_block..=self.last_block).collect()
    }

    pub fn block_count(&self) -> u64 {
        self.last_block.saturating_sub(self.first_block) + 1
    }
}

/// One pipeline stage. A job declares which record kinds it reads and
/// writes; the dispatcher orders jobs so that every dependency is fully
/// produced before a consumer's `collect` phase starts.
///
/// The four phases run once per batch, in order. Only `collect` performs
/// I/O; `process` is a pure in-memory transform (sort, dedupe, aggregate)
/// over what `collect` wrote. Retriable RPC failures are retried inside
/// `collect` by the batch executor; any error escaping a phase aborts the
/// whole batch.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    /// Record kinds this job reads from the buffer.
    fn dependencies(&self) -> &'static [RecordKind];

    /// Record kinds this job writes. Each kind has exactly one producer.
    fn outputs(&self) -> &'static [RecordKind];

    /// Whether this job participates in reorg re-derivation.
    fn able_to_reorg(&self) -> bool {
        true
    }

    /// Per-batch setup. No I/O.
    fn start(&self, _ctx: &BatchContext) -> Result<()> {
        Ok(())
    }

    /// Reads dependencies from the buffer and/or fetches externally, then
    /// writes raw outputs. The only phase allowed to perform I/O.
    async fn collect(&self, ctx: &BatchContext, buffer: &mut SyncBuffer) -> Result<()>;

    /// Pure in-memory transform of this job's own outputs.
    fn process(&self, _ctx: &BatchContext, _buffer: &mut SyncBuffer) -> Result<()> {
        Ok(())
    }

    /// Per-batch teardown.
    fn end(&self, _ctx: &BatchContext) -> Result<()> {
        Ok(())
    }
}
