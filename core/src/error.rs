use thiserror::Error;

pub type Result<T> = std::result::Result<T, RalphError>;

/// Errors from the verification/open path of [`crate::atomic_open`].
///
/// These are deliberately distinct from [`RalphError`] because every variant
/// here maps 1:1 onto one of the `§4.14` error shapes the model sees; keeping
/// them as a closed enum makes that mapping exhaustive-checkable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("path is invalid: {0}")]
    InvalidPath(String),
    #[error("open failed: {0}")]
    Open(String),
    #[error("stat failed: {0}")]
    Stat(String),
    #[error("file changed since it was approved (inode/device mismatch)")]
    InodeMismatch,
    #[error("parent directory changed since it was approved")]
    ParentChanged,
    #[error("file already exists")]
    AlreadyExists,
    #[error("refusing to follow symlink")]
    SymlinkRejected,
}

#[derive(Error, Debug)]
pub enum RalphError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("verification failed: {0}")]
    Verify(#[from] VerifyError),

    #[error("regex compile failed: {0}")]
    Regex(String),

    #[error("approval channel error: {0}")]
    Channel(String),

    #[error("malformed tool arguments: {0}")]
    BadArguments(String),
}
