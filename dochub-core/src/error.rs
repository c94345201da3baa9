use thiserror::Error;

/// Errors surfaced to the immediate caller of the core. The core performs no
/// internal retries; retry policy, if any, belongs to the hosting layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported path: {0}")]
    UnsupportedPath(String),
    #[error("authority mismatch: expected {expected}, got {actual}")]
    AuthorityMismatch { expected: String, actual: String },
    #[error("document {child} is not a descendant of {anchor}")]
    NotDescendant { anchor: String, child: String },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("operation not supported by this provider: {0}")]
    NotSupported(&'static str),
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("invalid mime filter: {0}")]
    InvalidMimeFilter(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
