use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::StoreError;
use crate::transcode::TranscodeError;

/// Why the admission gate turned a request away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    TooLarge {
        requested: u64,
        limit: u64,
    },
    InsufficientSpace {
        requested: u64,
        available: u64,
        reserved: u64,
    },
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::TooLarge { requested, limit } => {
                write!(f, "file of {requested} bytes exceeds the {limit} byte limit")
            }
            Denial::InsufficientSpace {
                requested,
                available,
                reserved,
            } => write!(
                f,
                "insufficient disk space: {requested} bytes requested, {available} available, {reserved} reserved"
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("upload rejected: {0}")]
    Denied(Denial),
    #[error("invalid filename: {0:?}")]
    InvalidFilename(String),
    #[error("invalid chunk {index} of {total}")]
    InvalidChunk { index: u32, total: u32 },
    #[error("no upload found at {0}")]
    MissingUpload(PathBuf),
    #[error("upload size mismatch: declared {declared} bytes, received {actual}")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("transcode error: {0}")]
    Transcode(#[from] TranscodeError),
}

impl IngestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Io {
            source,
            path: path.into(),
        }
    }
}

impl From<Denial> for IngestError {
    fn from(denial: Denial) -> Self {
        IngestError::Denied(denial)
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
