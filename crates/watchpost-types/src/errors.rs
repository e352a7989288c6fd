use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = WatchpostError> = std::result::Result<T, E>;

/// Unified error type covering common failure scenarios across subsystems.
#[derive(Debug, Error)]
pub enum WatchpostError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("archive full: picture of {size} bytes exceeds quota of {max} bytes")]
    ArchiveFull { size: u64, max: u64 },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage error at {}: {source}", path.display())]
    StorageIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("network error: {0}")]
    Network(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WatchpostError {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WatchpostError::StorageIo {
            path: path.into(),
            source,
        }
    }

    /// True for errors caused by the caller's input rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            WatchpostError::InvalidFrame(_)
                | WatchpostError::NotFound(_)
                | WatchpostError::ArchiveFull { .. }
        )
    }
}
