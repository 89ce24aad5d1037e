use crate::records::Record;
use crate::storage::RecordStore;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// End-of-batch sink for the requested slice of the buffer. The cursor only
/// advances after `export` returns `Ok`.
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn export(&self, records: &[Record]) -> Result<()>;
}

/// Default exporter: upserts into a [`RecordStore`].
pub struct StoreExporter {
    store: Arc<dyn RecordStore>,
}

impl StoreExporter {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Exporter for StoreExporter {
    async fn export(&self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let written = self.store.upsert(records).await?;
        tracing::debug!(
            records = records.len(),
            written,
            "batch exported to record store"
        );
        Ok(())
    }
}
