use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tenant_backup_core::Driver;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("database error")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error")]
    Io(#[from] io::Error),

    #[error("{0} databases are not handled by this server")]
    UnsupportedDriver(Driver),

    #[error("database {0} does not exist")]
    MissingDatabase(String),

    #[error("failed to start {program}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    ToolFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{program} did not finish within {timeout:?}")]
    ToolTimeout { program: String, timeout: Duration },

    #[error("statement #{index} failed: {preview}")]
    Statement {
        index: u64,
        preview: String,
        #[source]
        source: Box<DumpError>,
    },

    #[error("gzip encoding of {} failed", path.display())]
    Compression {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("gzip decoding of {} failed", path.display())]
    Decompression {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
