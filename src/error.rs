//! Classified failures a caller may want to render precisely.
//!
//! Everything else propagates as plain [`anyhow::Error`] with context. Callers
//! recover the kind with `err.downcast_ref::<SourceError>()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid git source url: {0}")]
    InvalidCloneSpec(String),

    #[error("invalid binary input file name {0:?}: must be a relative path inside the build directory")]
    InvalidBinaryPath(String),

    #[error("failed to fetch requested repository {0:?} with provided credentials")]
    GitAuthentication(String),

    #[error("requested repository {0:?} not found")]
    GitNotFound(String),

    #[error("timeout while waiting for remote repository {0:?}")]
    RemoteTimeout(String),

    #[error("unable to extract binary build input, must be a zip, tar, or gzipped tar, or specified as a file: {0}")]
    BinaryExtraction(#[source] anyhow::Error),
}
