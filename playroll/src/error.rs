//! Error types for playroll
//!
//! Store-layer failures surface to their caller. The scheduler absorbs the
//! transient kinds (sink rejection, missing payload, a failed read during a
//! delivery tick) and retries on the next feedback tick.

use thiserror::Error;

/// Main error type for playroll
#[derive(Error, Debug)]
pub enum Error {
    /// Operation referenced an id that does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Out-of-range index, malformed predicate or ordering source
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Sink refused an append or removal (busy or malformed)
    #[error("Sink rejected operation: {0}")]
    TransientSinkRejection(String),

    /// Queue entry has no payload to deliver
    #[error("Missing payload for queue entry {0}")]
    MissingPayload(i64),

    /// Transaction, commit or query failure in the store
    #[error("Store transaction failed: {0}")]
    StoreTransaction(#[from] sqlx::Error),

    /// Metadata could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database content this build cannot interpret
    #[error("Schema error: {0}")]
    Schema(String),
}

impl From<playroll_common::Error> for Error {
    fn from(err: playroll_common::Error) -> Self {
        use playroll_common::Error as Common;

        match err {
            Common::Database(e) => Error::StoreTransaction(e),
            Common::Io(e) => Error::Io(e),
            Common::Serialization(e) => Error::Serialization(e),
            Common::Config(msg) => Error::Config(msg),
            Common::InvalidInput(msg) => Error::InvalidArgument(msg),
            Common::Schema(msg) => Error::Schema(msg),
        }
    }
}

/// Convenience Result type using playroll Error
pub type Result<T> = std::result::Result<T, Error>;
