//! Errors raised by the storage layer

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata column could not be encoded or decoded
    #[error("Metadata encoding error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Config file missing, unreadable or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Database content this build cannot interpret
    #[error("Schema error: {0}")]
    Schema(String),
}
