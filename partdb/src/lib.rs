pub mod aggregate;
pub mod engine;
pub mod error;
pub mod keys;
pub mod query;
pub mod record;
pub mod schema;
pub mod store;
pub mod validation;

pub use aggregate::{Matcher, Predicate, RecordStream};
pub use engine::{Engine, EngineError, FileEngine, MemoryEngine};
pub use error::{PartDbError, Result};
pub use keys::{id_max_value, is_valid_id, is_valid_partition_name, IdPolicy, KeyCodec};
pub use query::Query;
pub use record::Record;
pub use schema::{FieldDefinition, FieldType, Schema};
pub use store::{Selector, Store, StoreConfig, StoreOp};
