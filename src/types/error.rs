use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum R2syncError {
    /// Malformed remote address, or a bucket name outside the naming grammar.
    #[error("invalid uri: {0}")]
    InvalidUri(String),
    /// A local root that must be a directory is missing or is something else.
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("a object references outside of the destination directory: {0}")]
    PathTraversalRejected(String),
    /// A remote call failed after the SDK exhausted its retries.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("multipart upload failed and was aborted: {0}")]
    PartialMultipartFailure(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid transfer config: {0}")]
    InvalidTransferConfig(String),
    #[error("cancelled")]
    Cancelled,
}

pub fn is_cancelled_error(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<R2syncError>(), Some(R2syncError::Cancelled))
}
