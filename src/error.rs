//! Error types for ShardKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for ShardKV operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Key Errors
    // -------------------------------------------------------------------------
    /// A physical key on the shared partition has no usable NUL separator
    #[error("Malformed key: {0}")]
    MalformedKey(String),

    #[error("Key not found")]
    NotFound,

    #[error("Duplicate key")]
    DuplicateKey,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    /// Option entry understood neither by the engine nor by the store overrides
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    // -------------------------------------------------------------------------
    // Sharding Errors
    // -------------------------------------------------------------------------
    #[error("Sharding syntax error at offset {offset}: {message}")]
    ShardingSyntax { offset: usize, message: String },

    #[error("Sharding mismatch: requested [{requested}], stored [{stored}]")]
    ShardingMismatch { requested: String, stored: String },

    #[error("Sharding conflict for column '{name}': {message}")]
    ShardingConflict { name: String, message: String },

    #[error("Missing column families: {0:?}")]
    MissingColumnFamily(Vec<String>),

    #[error("Column families present in engine but not in sharding definition: {0:?}")]
    ExtraColumnFamilies(Vec<String>),

    // -------------------------------------------------------------------------
    // Engine Errors
    // -------------------------------------------------------------------------
    /// The underlying engine reported an I/O or internal failure
    #[error("Engine failure: {0}")]
    Engine(String),

    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
