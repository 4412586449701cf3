//! Git error types and classification.

use thiserror::Error;

/// Errors from git subprocesses.
#[derive(Error, Debug)]
pub enum GitOpsError {
    #[error("Git operation failed: {0}")]
    GitOperation(String),

    #[error("Git network error: {0}")]
    GitNetworkError(String),

    #[error("Git operation timed out after {0}s")]
    GitTimeout(u64),

    #[error("Git authentication failed: {0}")]
    GitAuthFailed(String),

    #[error("Failed to spawn git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Remote rejected {reference}: {reason}")]
    RemoteRejected { reference: String, reason: String },

    #[error("File operation failed: {0}")]
    FileOperation(String),
}

impl From<std::io::Error> for GitOpsError {
    fn from(err: std::io::Error) -> Self {
        GitOpsError::FileOperation(err.to_string())
    }
}

impl GitOpsError {
    /// Returns true if the error is likely transient and the event can be redelivered.
    ///
    /// A remote policy rejection (protected branch, hook failure) will not
    /// change on redelivery.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GitOpsError::RemoteRejected { .. })
    }
}

/// Classifies a git stderr string into a more specific error variant.
pub fn classify_git_error(stderr: &str) -> GitOpsError {
    let lower = stderr.to_lowercase();

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("unable to access")
        || lower.contains("failed to connect")
        || lower.contains("couldn't connect to server")
        || lower.contains("the remote end hung up unexpectedly")
    {
        return GitOpsError::GitNetworkError(stderr.trim().to_string());
    }

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("invalid credentials")
        || lower.contains("invalid username or password")
    {
        return GitOpsError::GitAuthFailed(stderr.trim().to_string());
    }

    GitOpsError::GitOperation(stderr.trim().to_string())
}

/// Failure of a push, classified from the remote's per-ref status.
#[derive(Error, Debug)]
pub enum PushError {
    /// The remote branch has commits the local branch does not contain.
    #[error("Push of {reference} rejected as non-fast-forward")]
    FastForwardRejected { reference: String },

    #[error(transparent)]
    Other(#[from] GitOpsError),
}

/// Result type for git operations.
pub type Result<T> = std::result::Result<T, GitOpsError>;
