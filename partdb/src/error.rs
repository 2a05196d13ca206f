use thiserror::Error;

use crate::engine::EngineError;

#[derive(Error, Debug)]
pub enum PartDbError {
    #[error("Key error: {0}")]
    Key(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Not found: {key}")]
    NotFound { key: String },

    #[error("\"{0}\" Not Implemented")]
    NotImplemented(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PartDbError {
    pub fn invalid_id(field: &str, id: impl std::fmt::Display) -> Self {
        PartDbError::Key(format!("Invalid or missing \"{field}\"=\"{id}\""))
    }

    pub fn id_exists(field: &str, id: &str) -> Self {
        PartDbError::Key(format!("Key/ID exists \"{field}={id}\""))
    }

    pub fn id_not_found(field: &str, id: &str) -> Self {
        PartDbError::Key(format!("Key/ID \"{field}={id}\" not found"))
    }

    /// True for the engine-origin not-found error raised by point reads.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PartDbError::NotFound { .. })
    }
}

impl From<EngineError> for PartDbError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound { key } => PartDbError::NotFound { key },
            EngineError::Storage(msg) => PartDbError::Engine(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, PartDbError>;
