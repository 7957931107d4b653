//! Error types for store operations.

/// Errors surfaced by the object store client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The named bucket does not exist or is not visible to the access.
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    /// No object exists at the requested key.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// The access grant does not permit the attempted operation.
    #[error("permission denied")]
    PermissionDenied,

    /// The serialized access grant could not be decoded.
    #[error("invalid access grant: {0}")]
    InvalidAccess(String),

    /// IO error while transferring object bytes.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure in the underlying transport.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;
