mod selector;

pub use selector::{Selector, StoreConfig, StoreOp, WILDCARD};

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::future;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;

use crate::aggregate::{self, Matcher, RecordStream};
use crate::engine::{self, BatchOp, Engine, EngineError, Entry, ScanOptions};
use crate::error::{PartDbError, Result};
use crate::keys::KeyCodec;
use crate::record::{self, Record};
use crate::schema::Schema;

/// A partition-scoped, schema-validated view over a shared engine.
///
/// Stores are cheap to clone. Several stores may share one engine; the key
/// prefix is the only thing separating their records, so two stores opened
/// on the same partition see each other's writes whatever their schemas.
///
/// Writes are not serialized: `add` checks for an existing id and then
/// writes, and unique fields are checked against a listing taken before the
/// write. Two concurrent writers can both pass those checks, in which case
/// the last `put` wins.
#[derive(Clone)]
pub struct Store {
    engine: Arc<dyn Engine>,
    partition: Option<String>,
    codec: KeyCodec,
    schema: Arc<Schema>,
    config: StoreConfig,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("partition", &self.partition)
            .field("primary_key", &self.primary_key())
            .field("config", &self.config)
            .finish()
    }
}

impl Store {
    /// Open a store on `partition` with the default id policy.
    pub fn open(engine: Arc<dyn Engine>, partition: &str, schema: Schema) -> Result<Self> {
        Self::with_config(engine, partition, schema, StoreConfig::default())
    }

    pub fn with_config(
        engine: Arc<dyn Engine>,
        partition: &str,
        schema: Schema,
        config: StoreConfig,
    ) -> Result<Self> {
        let codec = KeyCodec::partitioned(partition)?;
        log::debug!("opened store {partition} (primary key '{}')", schema.primary_key());
        Ok(Store {
            engine,
            partition: Some(partition.to_string()),
            codec,
            schema: Arc::new(schema),
            config,
        })
    }

    /// Untyped store keyed by `primary_key`.
    pub fn untyped(engine: Arc<dyn Engine>, partition: &str, primary_key: &str) -> Result<Self> {
        Self::open(engine, partition, Schema::untyped(primary_key)?)
    }

    /// Store whose ids are the engine keys themselves. It owns every key in
    /// the engine.
    pub fn unpartitioned(engine: Arc<dyn Engine>, schema: Schema, config: StoreConfig) -> Self {
        Store {
            engine,
            partition: None,
            codec: KeyCodec::Raw,
            schema: Arc::new(schema),
            config,
        }
    }

    pub fn partition(&self) -> Option<&str> {
        self.partition.as_deref()
    }

    pub fn primary_key(&self) -> &str {
        self.schema.primary_key()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn label(&self) -> &str {
        self.partition.as_deref().unwrap_or("<raw>")
    }

    /// Engine key for `id`, checked against the store's id policy.
    fn key_for(&self, id: &str) -> Result<Bytes> {
        self.codec
            .encode(id, &self.config.id_policy)
            .map_err(|_| PartDbError::invalid_id(self.primary_key(), id))
    }

    /// The record's id, which must be a string accepted by the id policy.
    fn require_id(&self, record: &Record) -> Result<(String, Bytes)> {
        let pk = self.primary_key();
        let id = match record.get(pk) {
            Some(Value::String(id)) => id.clone(),
            Some(other) => return Err(PartDbError::invalid_id(pk, other)),
            None => return Err(PartDbError::invalid_id(pk, "undefined")),
        };
        let key = self.key_for(&id)?;
        Ok((id, key))
    }

    async fn scan_entries(&self) -> Result<BoxStream<'static, Result<Entry>>> {
        let (gt, lt) = self.codec.scoped_range();
        let iter = self.engine.scan(ScanOptions::between(gt, lt)).await?;
        Ok(engine::into_stream(iter).map_err(PartDbError::from).boxed())
    }

    /// Decoded records of this partition in key order, each carrying its id
    /// under the primary key.
    async fn scan_records(&self) -> Result<RecordStream> {
        let codec = self.codec.clone();
        let pk = self.primary_key().to_string();
        let label = self.label().to_string();
        let entries = self.scan_entries().await?;
        Ok(entries
            .filter_map(move |item| {
                future::ready(match item {
                    Ok(entry) => decode_entry(&codec, &pk, &label, &entry).map(Ok),
                    Err(e) => Some(Err(e)),
                })
            })
            .boxed())
    }

    async fn matching(&self, matcher: Matcher) -> Result<RecordStream> {
        Ok(aggregate::filter(self.scan_records().await?, matcher))
    }

    async fn first_match(&self, matcher: Matcher) -> Result<Option<Record>> {
        // Undecodable entries are dropped after the engine scan, so the scan
        // itself stays unbounded.
        let mut stream = self.matching(matcher).await?;
        stream.try_next().await
    }

    async fn contains_key(&self, key: &[u8]) -> Result<bool> {
        match self.engine.get(key).await {
            Ok(_) => Ok(true),
            Err(EngineError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// True when the id is stored, or when any record matches.
    pub async fn exists(&self, selector: impl Into<Selector>) -> Result<bool> {
        let selector = selector.into();
        let found = match &selector {
            Selector::ById(id) => self.contains_key(&self.key_for(id)?).await?,
            other => match other.matcher() {
                Some(matcher) => self.first_match(matcher).await?.is_some(),
                None => false,
            },
        };
        log::debug!("{}: exists {selector:?} -> {found}", self.label());
        Ok(found)
    }

    /// Insert a new record. Fails with a key error when the id is taken.
    pub async fn add(&self, record: Record) -> Result<()> {
        self.insert(record, false).await
    }

    /// Insert or overwrite without checking for an existing id. Defaults and
    /// validation still apply.
    pub async fn force_add(&self, record: Record) -> Result<()> {
        self.insert(record, true).await
    }

    async fn insert(&self, record: Record, force: bool) -> Result<()> {
        let (id, key) = self.require_id(&record)?;
        if !force && self.contains_key(&key).await? {
            return Err(PartDbError::id_exists(self.primary_key(), &id));
        }

        let mut value = self.schema.apply_defaults(&record);
        value.insert(self.primary_key().to_string(), Value::String(id.clone()));
        self.schema
            .validate(&value, || self.find_many(Selector::All))
            .await?;

        self.engine.put(key, record::encode(&value)?).await?;
        log::debug!("{}: added {id} (force={force})", self.label());
        Ok(())
    }

    /// Merge `partial` over the stored record named by its primary key.
    /// Fails with [`PartDbError::NotFound`] when there is no such record.
    pub async fn update(&self, partial: Record) -> Result<()> {
        let (id, key) = self.require_id(&partial)?;
        let previous = record::decode(&self.engine.get(&key).await?)?;

        let mut merged = record::merge(previous, &partial);
        merged.insert(self.primary_key().to_string(), Value::String(id.clone()));
        self.schema
            .validate(&merged, || self.find_many(Selector::All))
            .await?;

        self.engine.put(key, record::encode(&merged)?).await?;
        log::debug!("{}: updated {id}", self.label());
        Ok(())
    }

    /// Look up one record.
    ///
    /// By id, a miss is an error ([`PartDbError::NotFound`]). By query or
    /// predicate, a miss is `Ok(None)`; use [`exists`](Self::exists) to test
    /// for presence.
    pub async fn find_one(&self, selector: impl Into<Selector>) -> Result<Option<Record>> {
        let selector = selector.into();
        match &selector {
            Selector::ById(id) => {
                let bytes = self.engine.get(&self.key_for(id)?).await?;
                let mut found = record::decode(&bytes)?;
                found.insert(self.primary_key().to_string(), Value::String(id.clone()));
                Ok(Some(found))
            }
            other => match other.matcher() {
                Some(matcher) => self.first_match(matcher).await,
                None => Ok(None),
            },
        }
    }

    /// By-id read that resolves to `None` on a miss.
    pub async fn get(&self, id: &str) -> Result<Option<Record>> {
        match self.find_one(Selector::ById(id.to_string())).await {
            Err(e) if e.is_not_found() => Ok(None),
            other => other,
        }
    }

    /// All matching records in key order. Never fails for "no results".
    pub async fn find_many(&self, selector: impl Into<Selector>) -> Result<Vec<Record>> {
        let selector = selector.into();
        let Some(matcher) = selector.matcher() else {
            return Err(PartDbError::NotImplemented("find_many(id)".into()));
        };
        let stream = self.matching(matcher).await?;
        let found = aggregate::reduce(stream, Vec::new(), aggregate::concat(|_| true)).await?;
        log::debug!("{}: find_many {selector:?} -> {}", self.label(), found.len());
        Ok(found)
    }

    /// Delete matching records, returning how many were deleted.
    ///
    /// Deleting a single id that is not stored is a key error. Query and
    /// predicate deletes only see records present when the scan started.
    pub async fn remove(&self, selector: impl Into<Selector>) -> Result<usize> {
        let selector = selector.into();
        let removed = match &selector {
            Selector::ById(id) => {
                let key = self.key_for(id)?;
                if !self.contains_key(&key).await? {
                    return Err(PartDbError::id_not_found(self.primary_key(), id));
                }
                self.engine.del(&key).await?;
                1
            }
            Selector::All => self.remove_all().await?,
            other => {
                let Some(matcher) = other.matcher() else {
                    return Err(PartDbError::NotImplemented("remove".into()));
                };
                let stream = self.matching(matcher).await?;
                let engine = self.engine.clone();
                let codec = self.codec.clone();
                let pk = self.primary_key().to_string();
                aggregate::reduce(
                    stream,
                    0,
                    aggregate::count(move |found: Record| {
                        let engine = engine.clone();
                        let key = record::id_of(&found, &pk).map(|id| codec.key_of(id));
                        async move {
                            if let Some(key) = key {
                                engine.del(&key).await?;
                            }
                            Ok(())
                        }
                    }),
                )
                .await?
            }
        };
        log::debug!("{}: remove {selector:?} -> {removed}", self.label());
        Ok(removed)
    }

    /// Deletes every key in the partition, including entries whose values
    /// no longer decode.
    async fn remove_all(&self) -> Result<usize> {
        let (gt, lt) = self.codec.scoped_range();
        let iter = self
            .engine
            .scan(ScanOptions::between(gt, lt).keys_only())
            .await?;
        let mut keys = engine::into_stream(iter);
        let mut removed = 0;
        while let Some(entry) = keys.try_next().await? {
            if !self.codec.is_match(&entry.key) {
                continue;
            }
            self.engine.del(&entry.key).await?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Delete every record in the partition.
    pub async fn clear(&self) -> Result<usize> {
        self.remove(Selector::All).await
    }

    /// Number of matching records.
    pub async fn count(&self, selector: impl Into<Selector>) -> Result<usize> {
        let selector = selector.into();
        if let Selector::ById(id) = &selector {
            return Ok(usize::from(self.contains_key(&self.key_for(id)?).await?));
        }
        let Some(matcher) = selector.matcher() else {
            return Ok(0);
        };
        let stream = self.matching(matcher).await?;
        aggregate::reduce(stream, 0, aggregate::count(|_| future::ready(Ok(())))).await
    }

    /// Apply several writes in one engine batch.
    ///
    /// This is the bulk-load path: ids are checked but records are written
    /// as given, without defaults or schema validation.
    pub async fn batch(&self, ops: Vec<StoreOp>) -> Result<()> {
        let mut batch = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                StoreOp::Put { record } => {
                    let (_, key) = self.require_id(&record)?;
                    batch.push(BatchOp::Put {
                        key,
                        value: record::encode(&record)?,
                    });
                }
                StoreOp::Delete { id } => batch.push(BatchOp::Delete {
                    key: self.key_for(&id)?,
                }),
            }
        }
        let n = batch.len();
        self.engine.batch(batch).await?;
        log::debug!("{}: batch of {n} ops", self.label());
        Ok(())
    }
}

/// Turns a scanned entry into a record, or `None` (logged) when it does
/// not belong to the partition or cannot be decoded.
fn decode_entry(codec: &KeyCodec, pk: &str, label: &str, entry: &Entry) -> Option<Record> {
    if !codec.is_match(&entry.key) {
        log::warn!(
            "{label}: skipping foreign key {}",
            String::from_utf8_lossy(&entry.key)
        );
        return None;
    }
    let id = match codec.decode(&entry.key) {
        Ok(id) => id,
        Err(e) => {
            log::warn!("{label}: skipping undecodable key: {e}");
            return None;
        }
    };
    match record::decode(&entry.value) {
        Ok(mut found) => {
            found.insert(pk.to_string(), Value::String(id));
            Some(found)
        }
        Err(e) => {
            log::warn!("{label}: skipping record {id}: {e}");
            None
        }
    }
}
