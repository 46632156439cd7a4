use thiserror::Error;
use webmention_scanner::ScanError;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed source/target. Reported to senders as 400.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Target content is absent or unpublished. Reported as 404.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(#[from] ScanError),

    /// The host already holds an identical comment.
    #[error("Duplicate comment")]
    Duplicate,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
