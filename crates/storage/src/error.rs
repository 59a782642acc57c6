use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid object key: {0:?}")]
    InvalidKey(String),

    #[error("storage I/O failed for {key}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("catalog is not valid JSON")]
    Serialization(#[from] serde_json::Error),

    #[error("catalog database error")]
    Catalog(#[from] rusqlite::Error),

    #[error("storage task panicked or was cancelled")]
    Task(#[from] tokio::task::JoinError),
}

impl StorageError {
    pub(crate) fn io(key: &str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound(key.to_owned()),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(key.to_owned()),
            _ => Self::Io {
                key: key.to_owned(),
                source,
            },
        }
    }
}
