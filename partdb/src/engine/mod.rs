//! Ordered key-value engine contract consumed by stores.
//!
//! An engine offers point `get`/`put`/`del`, atomic `batch` writes and
//! bounded range scans. Keys sort byte-lexically. Stores never rely on
//! anything beyond this trait, so any backend honouring it can sit under
//! a [`Store`](crate::Store).

mod file;
mod memory;

pub use file::FileEngine;
pub use memory::MemoryEngine;

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;

/// Errors surfaced by an engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Point read of a key that is not stored.
    #[error("Key not found in database [{key}]")]
    NotFound { key: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn not_found(key: &[u8]) -> Self {
        EngineError::NotFound {
            key: String::from_utf8_lossy(key).into_owned(),
        }
    }

    pub fn from_storage(e: impl std::fmt::Display) -> Self {
        EngineError::Storage(e.to_string())
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// A key/value pair yielded by a scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub key: Bytes,
    pub value: Bytes,
}

impl Entry {
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A single write inside [`Engine::batch`].
#[derive(Clone, Debug)]
pub enum BatchOp {
    Put { key: Bytes, value: Bytes },
    Delete { key: Bytes },
}

/// Range scan bounds. Both bounds are exclusive.
#[derive(Clone, Debug)]
pub struct ScanOptions {
    pub gt: Option<Bytes>,
    pub lt: Option<Bytes>,
    /// Maximum number of entries to yield; `None` is unbounded.
    pub limit: Option<usize>,
    pub reverse: bool,
    /// When false, yielded entries carry an empty key.
    pub keys: bool,
    /// When false, yielded entries carry an empty value.
    pub values: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            gt: None,
            lt: None,
            limit: None,
            reverse: false,
            keys: true,
            values: true,
        }
    }
}

impl ScanOptions {
    pub fn between(gt: impl Into<Bytes>, lt: impl Into<Bytes>) -> Self {
        Self {
            gt: Some(gt.into()),
            lt: Some(lt.into()),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn keys_only(mut self) -> Self {
        self.keys = true;
        self.values = false;
        self
    }
}

/// Forward-only, single-use cursor over scan results.
#[async_trait]
pub trait EngineIterator: Send {
    async fn next(&mut self) -> EngineResult<Option<Entry>>;
}

/// The ordered key-value engine.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Reads a key, failing with [`EngineError::NotFound`] when absent.
    async fn get(&self, key: &[u8]) -> EngineResult<Bytes>;

    /// Writes a key, overwriting any existing value.
    async fn put(&self, key: Bytes, value: Bytes) -> EngineResult<()>;

    /// Deletes a key. No-op if the key does not exist.
    async fn del(&self, key: &[u8]) -> EngineResult<()>;

    /// Applies all operations together; either every op is visible or none.
    async fn batch(&self, ops: Vec<BatchOp>) -> EngineResult<()>;

    /// Opens a cursor over the keys selected by `options`.
    async fn scan(&self, options: ScanOptions) -> EngineResult<Box<dyn EngineIterator>>;
}

/// Adapts a cursor into a pull-based stream.
pub fn into_stream(iter: Box<dyn EngineIterator>) -> BoxStream<'static, EngineResult<Entry>> {
    stream::try_unfold(iter, |mut iter| async move {
        let next = iter.next().await?;
        Ok(next.map(|entry| (entry, iter)))
    })
    .boxed()
}

/// Cursor over entries materialised when the scan was opened.
pub(crate) struct SnapshotIterator {
    entries: std::vec::IntoIter<Entry>,
}

impl SnapshotIterator {
    pub(crate) fn new(entries: Vec<Entry>) -> Self {
        Self {
            entries: entries.into_iter(),
        }
    }
}

#[async_trait]
impl EngineIterator for SnapshotIterator {
    async fn next(&mut self) -> EngineResult<Option<Entry>> {
        Ok(self.entries.next())
    }
}

/// Selects the entries of an ordered map that satisfy `options`.
pub(crate) fn scan_map(map: &BTreeMap<Bytes, Bytes>, options: &ScanOptions) -> Vec<Entry> {
    if let (Some(gt), Some(lt)) = (&options.gt, &options.lt) {
        // BTreeMap::range panics on inverted or empty exclusive ranges.
        if gt >= lt {
            return Vec::new();
        }
    }
    let lower = options.gt.clone().map_or(Bound::Unbounded, Bound::Excluded);
    let upper = options.lt.clone().map_or(Bound::Unbounded, Bound::Excluded);
    let limit = options.limit.unwrap_or(usize::MAX);

    let project = |(k, v): (&Bytes, &Bytes)| Entry {
        key: if options.keys { k.clone() } else { Bytes::new() },
        value: if options.values { v.clone() } else { Bytes::new() },
    };

    let range = map.range((lower, upper));
    if options.reverse {
        range.rev().take(limit).map(project).collect()
    } else {
        range.take(limit).map(project).collect()
    }
}
