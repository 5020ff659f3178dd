//! Error types for the playback core.
//!
//! Ordinary conditions (missing frame, end of sequence, header mismatch) are
//! not errors: they surface as `None` or as a zero-frame source. The types here
//! cover faults that callers actually propagate.

use std::path::PathBuf;
use thiserror::Error;

/// Failure while opening or reading on-disk frame storage.
#[derive(Debug, Error)]
pub enum FrameSourceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bad frame timing file {path}: {source}")]
    Timing {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("glob pattern error: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// Hardware write path failure.
#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("display not initialized")]
    NotInitialized,
    #[error("operation not supported by driver: {0}")]
    Unsupported(&'static str),
    #[error("display I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("display driver error: {0}")]
    Driver(String),
}

/// Media index persistence failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("media index I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("media index {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown media slug '{0}'")]
    UnknownSlug(String),
}

/// Unexpected fault inside a tick. Caught at the tick boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("tick panicked: {0}")]
    Panic(String),
}
