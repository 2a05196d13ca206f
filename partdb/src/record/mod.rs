// Record I/O - JSON encoding of stored values

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{PartDbError, Result};

/// A stored record: field name to JSON value. Always carries its own
/// primary key.
pub type Record = serde_json::Map<String, Value>;

/// Convert any JSON value into a record, rejecting non-objects.
pub fn from_value(value: Value) -> Result<Record> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(PartDbError::Key(format!(
            "StoreRecord required, got {}",
            crate::validation::type_name(&other)
        ))),
    }
}

/// Serialize a typed value into a record.
pub fn from_serializable<T: Serialize>(value: &T) -> Result<Record> {
    from_value(serde_json::to_value(value)?)
}

/// Deserialize a record into a typed value.
pub fn into_typed<T: DeserializeOwned>(record: Record) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(record))?)
}

/// Encode a record as the engine value.
pub fn encode(record: &Record) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(record)?))
}

/// Decode an engine value into a record.
pub fn decode(bytes: &[u8]) -> Result<Record> {
    let value: Value = serde_json::from_slice(bytes)?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(PartDbError::Decode(format!(
            "stored value is {} rather than an object",
            crate::validation::type_name(&other)
        ))),
    }
}

/// Shallow merge: every field of `partial` overwrites the same field of
/// `previous`, including explicit nulls.
pub fn merge(previous: Record, partial: &Record) -> Record {
    let mut merged = previous;
    for (key, value) in partial {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// The record's id, when the primary-key field holds a string.
pub fn id_of<'a>(record: &'a Record, primary_key: &str) -> Option<&'a str> {
    record.get(primary_key).and_then(Value::as_str)
}
