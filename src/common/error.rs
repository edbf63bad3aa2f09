use thiserror::Error;

use super::types::{BlockNum, Buffer, Oid};

/// Storage engine error types
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Buffer pool is full, no evictable slot found after {rounds} clock rounds")]
    BufferPoolFull { rounds: usize },

    #[error("Invalid buffer: {0}")]
    InvalidBuffer(Buffer),

    #[error("Invalid block number: {0}")]
    InvalidBlock(BlockNum),

    #[error("Table {0} not found")]
    TableNotFound(Oid),

    #[error("Table {0} already exists")]
    TableAlreadyExists(Oid),

    #[error("Duplicate key: {0}")]
    DuplicateKey(u64),

    #[error("Key not found: {0}")]
    KeyNotFound(u64),

    #[error("Invalid node type byte: {0}")]
    InvalidNodeType(u8),

    #[error("Value length mismatch: expected {expected}, got {actual}")]
    ValueLength { expected: usize, actual: usize },

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker error: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, StrataError>;
