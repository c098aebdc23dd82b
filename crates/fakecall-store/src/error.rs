use thiserror::Error;

/// Errors that can occur while reading or persisting call records.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The payload column could not be encoded or decoded.
    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A timestamp column holds something that is not RFC 3339.
    #[error("invalid timestamp in column {column}: {value}")]
    InvalidTimestamp { column: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
