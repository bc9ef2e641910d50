use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to connect to {target} after {attempts} attempts: {source}")]
    Connection {
        target: String,
        attempts: u32,
        source: duckdb::Error,
    },
    #[error("Store still failing after {attempts} attempts: {source}")]
    TransientStore { attempts: u32, source: duckdb::Error },
    #[error("Schema error in {uri}: {message}")]
    Schema { uri: String, message: String },
    #[error("Source file not found: {}", _0.display())]
    NotFound(PathBuf),
    #[error("Table {0} does not exist")]
    MissingTable(String),
    #[error("Aggregate store {} is locked by another writer, gave up after {attempts} attempts", path.display())]
    MergeConflict { path: PathBuf, attempts: u32 },
    #[error("Invalid partition key {key:?}: {reason}")]
    InvalidPartitionKey { key: String, reason: String },
    #[error("Invalid geometry: {0}")]
    Geometry(String),
    #[error(transparent)]
    Store(#[from] duckdb::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn schema<U: ToString, M: ToString>(uri: U, message: M) -> PipelineError {
        PipelineError::Schema {
            uri: uri.to_string(),
            message: message.to_string(),
        }
    }

    pub fn invalid_key<R: ToString>(key: &str, reason: R) -> PipelineError {
        PipelineError::InvalidPartitionKey {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[macro_export]
macro_rules! bail {
    ($kind:expr, $e:expr) => {
        return Err($kind($e.to_owned()))
    };
    ($kind:expr, $fmt:expr, $($arg:tt)+) => {
        return Err($kind(format!($fmt, $($arg)+)))
    };
}
