use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::catalog::StoreError;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("media probe did not finish within {0:?}")]
    ProbeTimeout(Duration),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("job exceeded deadline of {0:?}")]
    Timeout(Duration),
}

impl TranscodeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TranscodeError::Io {
            source,
            path: path.into(),
        }
    }
}

pub type TranscodeResult<T> = Result<T, TranscodeError>;
