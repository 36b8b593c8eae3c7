//! VCS error types.

/// Errors produced while resolving repositories, commits and files.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VcsError {
    #[error("invalid repository address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("branch '{branch}' not found in {repository}")]
    BranchNotFound { repository: String, branch: String },

    #[error("file '{path}' not found in {repository}")]
    FileNotFound { repository: String, path: String },

    #[error("provider error: {0}")]
    Transient(String),

    #[error("cancelled")]
    Cancelled,
}

impl VcsError {
    pub(crate) fn invalid_address(address: &str, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns `true` when retrying the same call may succeed.
    ///
    /// The core never retries on its own; this is for callers that want to.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns `true` for the "path does not exist at that revision" case.
    pub fn is_file_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound { .. })
    }
}

impl From<reqwest::Error> for VcsError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transient(format!("request timed out: {err}"))
        } else {
            Self::Transient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for VcsError {
    fn from(err: serde_json::Error) -> Self {
        Self::Transient(format!("malformed provider response: {err}"))
    }
}
