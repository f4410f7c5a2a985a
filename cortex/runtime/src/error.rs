use std::time::Duration;

use cortex_kernel::DispatchError;
use thiserror::Error;

/// Failures of the blob store and the state store built on it.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem I/O error.
    #[error("io error on '{key}': {source}")]
    Io {
        /// Blob key being accessed.
        key: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Key that cannot be mapped onto storage.
    #[error("invalid blob key '{0}'")]
    InvalidKey(String),
    /// The dispatcher refused an action.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Failures reported by an [`Oracle`](crate::oracle::Oracle).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// The oracle could not be reached or declined to answer.
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
    /// The oracle answered with something unusable.
    #[error("malformed oracle response: {0}")]
    Malformed(String),
    /// No answer within the allotted time.
    #[error("oracle timed out after {0:?}")]
    Timeout(Duration),
}

/// Failures of the driver loop.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// State store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Oracle failure that could not be reported as a task failure.
    #[error(transparent)]
    Oracle(#[from] OracleError),
}
