use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use super::{
    scan_map, BatchOp, Engine, EngineError, EngineIterator, EngineResult, ScanOptions,
    SnapshotIterator,
};

/// Durable engine that keeps the ordered map in memory and rewrites a JSON
/// snapshot file after every mutation.
///
/// The file holds a single JSON object of `key -> value` strings, so keys and
/// values must be UTF-8. Writes go to a temporary file in the same directory
/// which is then renamed over the snapshot, so a crash leaves either the old
/// or the new state on disk.
///
/// Every mutation clones the map, then writes and fsyncs the whole snapshot
/// on the calling thread while holding the lock. Async callers block their
/// executor thread for the duration, so this engine suits small data sets
/// and CLI use; long-lived services should prefer an engine with real
/// async I/O.
#[derive(Clone)]
pub struct FileEngine {
    path: PathBuf,
    data: Arc<Mutex<BTreeMap<Bytes, Bytes>>>,
}

impl FileEngine {
    /// Open the snapshot at `path`, creating an empty engine if it is missing.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            load_snapshot(&path)?
        } else {
            BTreeMap::new()
        };
        log::debug!("Opened file engine at {} ({} keys)", path.display(), data.len());
        Ok(Self {
            path,
            data: Arc::new(Mutex::new(data)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate<F>(&self, f: F) -> EngineResult<()>
    where
        F: FnOnce(&mut BTreeMap<Bytes, Bytes>),
    {
        let mut data = self
            .data
            .lock()
            .map_err(|e| EngineError::Storage(format!("Failed to acquire lock: {e}")))?;
        let mut next = data.clone();
        f(&mut next);
        write_snapshot(&self.path, &next)?;
        *data = next;
        Ok(())
    }
}

fn load_snapshot(path: &Path) -> EngineResult<BTreeMap<Bytes, Bytes>> {
    let content = std::fs::read_to_string(path).map_err(EngineError::from_storage)?;
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let raw: BTreeMap<String, String> = serde_json::from_str(&content).map_err(|e| {
        EngineError::Storage(format!("Corrupt snapshot {}: {e}", path.display()))
    })?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| (Bytes::from(k), Bytes::from(v)))
        .collect())
}

fn write_snapshot(path: &Path, data: &BTreeMap<Bytes, Bytes>) -> EngineResult<()> {
    let mut raw = BTreeMap::new();
    for (k, v) in data {
        let key = std::str::from_utf8(k)
            .map_err(|_| EngineError::Storage("File engine keys must be UTF-8".into()))?;
        let value = std::str::from_utf8(v)
            .map_err(|_| EngineError::Storage("File engine values must be UTF-8".into()))?;
        raw.insert(key, value);
    }
    let json = serde_json::to_vec_pretty(&raw).map_err(EngineError::from_storage)?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(EngineError::from_storage)?;
    tmp.write_all(&json).map_err(EngineError::from_storage)?;
    tmp.as_file().sync_all().map_err(EngineError::from_storage)?;
    tmp.persist(path).map_err(EngineError::from_storage)?;
    Ok(())
}

#[async_trait]
impl Engine for FileEngine {
    async fn get(&self, key: &[u8]) -> EngineResult<Bytes> {
        let data = self
            .data
            .lock()
            .map_err(|e| EngineError::Storage(format!("Failed to acquire lock: {e}")))?;
        data.get(key)
            .cloned()
            .ok_or_else(|| EngineError::not_found(key))
    }

    async fn put(&self, key: Bytes, value: Bytes) -> EngineResult<()> {
        self.mutate(|data| {
            data.insert(key, value);
        })
    }

    async fn del(&self, key: &[u8]) -> EngineResult<()> {
        self.mutate(|data| {
            data.remove(key);
        })
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> EngineResult<()> {
        self.mutate(|data| {
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
        })
    }

    async fn scan(&self, options: ScanOptions) -> EngineResult<Box<dyn EngineIterator>> {
        let data = self
            .data
            .lock()
            .map_err(|e| EngineError::Storage(format!("Failed to acquire lock: {e}")))?;
        Ok(Box::new(SnapshotIterator::new(scan_map(&data, &options))))
    }
}
