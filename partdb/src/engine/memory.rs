use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use super::{
    scan_map, BatchOp, Engine, EngineError, EngineIterator, EngineResult, ScanOptions,
    SnapshotIterator,
};

/// In-memory ordered engine backed by a `BTreeMap`.
///
/// Cloning yields another handle onto the same map, so several stores can
/// share one engine the way they would share an on-disk database.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    data: Arc<RwLock<BTreeMap<Bytes, Bytes>>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored, across all partitions.
    pub fn len(&self) -> usize {
        self.data.read().map(|data| data.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock_error(e: impl std::fmt::Display) -> EngineError {
    EngineError::Storage(format!("Failed to acquire lock: {e}"))
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn get(&self, key: &[u8]) -> EngineResult<Bytes> {
        let data = self.data.read().map_err(lock_error)?;
        data.get(key)
            .cloned()
            .ok_or_else(|| EngineError::not_found(key))
    }

    async fn put(&self, key: Bytes, value: Bytes) -> EngineResult<()> {
        let mut data = self.data.write().map_err(lock_error)?;
        data.insert(key, value);
        Ok(())
    }

    async fn del(&self, key: &[u8]) -> EngineResult<()> {
        let mut data = self.data.write().map_err(lock_error)?;
        data.remove(key);
        Ok(())
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> EngineResult<()> {
        let mut data = self.data.write().map_err(lock_error)?;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn scan(&self, options: ScanOptions) -> EngineResult<Box<dyn EngineIterator>> {
        let data = self.data.read().map_err(lock_error)?;
        Ok(Box::new(SnapshotIterator::new(scan_map(&data, &options))))
    }
}
