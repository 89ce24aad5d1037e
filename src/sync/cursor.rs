use alloy_primitives::B256;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Last fully-synchronized block, with its hash so the controller can tell
/// whether that block is still on the canonical chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub block_number: u64,
    pub block_hash: B256,
}

/// Pluggable cursor persistence. Single writer: the sync controller.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn read(&self) -> Result<Option<Cursor>>;
    async fn write(&self, cursor: Cursor) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursor: Mutex<Option<Cursor>>,
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn read(&self) -> Result<Option<Cursor>> {
        Ok(*self.cursor.lock().expect("cursor mutex poisoned"))
    }

    async fn write(&self, cursor: Cursor) -> Result<()> {
        *self.cursor.lock().expect("cursor mutex poisoned") = Some(cursor);
        Ok(())
    }
}

/// JSON file cursor. Writes go through a temp file followed by a rename so
/// a crash mid-write never leaves a torn cursor behind.
#[derive(Debug)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut path = self.path.clone();
        path.as_mut_os_string().push(".tmp");
        path
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn read(&self) -> Result<Option<Cursor>> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("reading cursor file {}", self.path.display()))
            }
        };
        let cursor: Cursor = serde_json::from_slice(&contents)
            .with_context(|| format!("cursor file {} is corrupt", self.path.display()))?;
        Ok(Some(cursor))
    }

    async fn write(&self, cursor: Cursor) -> Result<()> {
        let encoded = serde_json::to_vec_pretty(&cursor).context("encoding cursor")?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, &encoded)
            .await
            .with_context(|| format!("writing cursor file {}", temp.display()))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .with_context(|| format!("replacing cursor file {}", self.path.display()))?;
        Ok(())
    }
}
