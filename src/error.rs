//! Error types for the long-to-long map storage engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index {index} out of bounds for store of length {len}")]
    OutOfBounds { index: u64, len: u64 },

    #[error("Value {value} does not fit in {lane}")]
    Encoding { value: i64, lane: &'static str },

    #[error("Keys must be non-decreasing: {key} came after {last}")]
    UnsortedKey { key: i64, last: i64 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Data corruption: {0}")]
    Corruption(String),

    #[error("Store already closed: {0}")]
    Closed(std::path::PathBuf),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
