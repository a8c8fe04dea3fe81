use std::{io, path::PathBuf, result::Result as StdResult};
use thiserror::Error;

/// Custom Result type for torque operations.
pub type Result<T> = StdResult<T, TorqueError>;

/// Torque-specific error types
#[derive(Error, Debug)]
pub enum TorqueError {
    /// The repository could not be inspected (not a repository, detached HEAD, missing branch).
    #[error("Repository state error: {0}")]
    RepoState(String),

    /// The caller supplied an invalid combination of arguments.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Staging, committing or pushing the temporary branch failed. Partial work has been
    /// rolled back by the time this error is returned.
    #[error("Failed to create temporary branch '{branch}': {message}")]
    TempBranchCreation {
        /// Name of the temporary branch that could not be materialized.
        branch: String,
        /// Human-readable error description.
        message: String,
    },

    /// The working tree could not be returned to the state captured when the context opened.
    #[error("Failed to restore the local repository: {0}")]
    Restoration(String),

    /// Polling the remote for job status failed repeatedly; the job state is unknown.
    #[error("Unable to poll sandbox {sandbox_id}: {message}")]
    Poll {
        /// Identifier of the sandbox being polled.
        sandbox_id: String,
        /// Human-readable error description.
        message: String,
    },

    /// The wait loop exceeded its allotted time. The remote job is not cancelled.
    #[error("Timeout reached: sandbox {sandbox_id} was not ready after {minutes} minutes")]
    Timeout {
        /// Identifier of the sandbox being waited on.
        sandbox_id: String,
        /// The timeout that elapsed, in minutes.
        minutes: u64,
    },

    /// Another branch context is already open against this working tree.
    #[error("A branch context is already active for repository: {repo_dir}")]
    ContextActive {
        /// Git directory of the repository holding the context lock.
        repo_dir: PathBuf,
    },

    /// The local repository is not usable as a blueprint repository.
    #[error("Bad blueprint repository: {0}")]
    BlueprintRepo(String),

    /// Settings could not be resolved.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The remote service rejected a request or could not be reached.
    #[error("Remote error: {0}")]
    Remote(String),

    /// A git command failed.
    #[error("Git error: {0}")]
    GitError(String),

    /// An underlying I/O operation failed.
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl TorqueError {
    /// Return the recommended process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) | Self::Config(_) => 2,
            Self::RepoState(_) | Self::BlueprintRepo(_) | Self::ContextActive { .. } => 3,
            Self::GitError(_) | Self::TempBranchCreation { .. } => 4,
            Self::Restoration(_) => 5,
            Self::Timeout { .. } => 6,
            Self::Poll { .. } | Self::Remote(_) => 7,
            Self::IoError(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_distinguish_timeout_from_poll_failure() {
        let timeout = TorqueError::Timeout {
            sandbox_id: "sb-1".to_string(),
            minutes: 30,
        };
        let poll = TorqueError::Poll {
            sandbox_id: "sb-1".to_string(),
            message: "connection refused".to_string(),
        };
        assert_ne!(timeout.exit_code(), poll.exit_code());
        assert_eq!(
            timeout.to_string(),
            "Timeout reached: sandbox sb-1 was not ready after 30 minutes"
        );
    }

    #[test]
    fn test_invalid_argument_message() {
        let err = TorqueError::InvalidArgument("commit requires branch".to_string());
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.to_string(), "Invalid argument: commit requires branch");
    }
}
