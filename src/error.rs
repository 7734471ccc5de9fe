// Birdbox Storage Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Video not found: {0}")]
    VideoNotFound(i64),

    #[error("Duplicate filename: {0}")]
    DuplicateFilename(String),

    #[error("Destination already exists: {0}")]
    DestinationExists(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Storage not writable: {0}")]
    NotWritable(String),

    #[error("FFprobe error: {0}")]
    FFprobe(String),

    #[error("Hash error: {0}")]
    Hash(String),

    #[error("Disk usage unavailable: {0}")]
    DiskUsage(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for StorageError {
    fn from(err: anyhow::Error) -> Self {
        StorageError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
