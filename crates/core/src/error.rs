//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid dataset name: {0}")]
    InvalidDatasetName(String),

    #[error("invalid path component: {0}")]
    InvalidPath(String),

    #[error("not a recognized dataset path: {0}")]
    NotADatasetPath(String),

    #[error("invalid repository: {0}")]
    InvalidRepository(String),

    #[error("invalid watermark: {0}")]
    InvalidWatermark(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
