//! Errors raised by file and git operations inside a sandbox.

use crate::sandbox::SandboxError;

/// Errors that can occur while mediating file or git access.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    /// Path resolves outside the workspace root.
    #[error("Path traversal detected: {path}")]
    PathTraversal { path: String },

    /// File or content exceeds the size ceiling.
    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    /// Content is not UTF-8 text.
    #[error("Binary file cannot be read as text: {path}")]
    BinaryFile { path: String },

    /// Path does not exist in the workspace.
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    /// Refused to delete the workspace root.
    #[error("Cannot delete workspace root")]
    RootDeletion,

    /// No GitHub remote or no credential to open a pull request with.
    #[error("Pull request not supported: {reason}")]
    PullRequestUnsupported { reason: String },

    /// A command ran but reported failure.
    #[error("{action} failed: {message}")]
    CommandFailed { action: String, message: String },

    /// GitHub rejected the request.
    #[error("GitHub API error: {message}")]
    GitHubApi { message: String },

    /// Engine failure underneath the file operation.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

impl FileError {
    /// Creates a `PathTraversal` error.
    pub fn path_traversal(path: impl Into<String>) -> Self {
        Self::PathTraversal { path: path.into() }
    }

    /// Creates a `FileNotFound` error.
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates a `BinaryFile` error.
    pub fn binary_file(path: impl Into<String>) -> Self {
        Self::BinaryFile { path: path.into() }
    }

    /// Creates a `PullRequestUnsupported` error.
    pub fn pull_request_unsupported(reason: impl Into<String>) -> Self {
        Self::PullRequestUnsupported {
            reason: reason.into(),
        }
    }

    /// Creates a `CommandFailed` error.
    pub fn command_failed(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CommandFailed {
            action: action.into(),
            message: message.into(),
        }
    }

    /// Creates a `GitHubApi` error.
    pub fn github_api(message: impl Into<String>) -> Self {
        Self::GitHubApi {
            message: message.into(),
        }
    }

    /// True when the path escaped the workspace.
    pub fn is_path_traversal(&self) -> bool {
        matches!(self, Self::PathTraversal { .. })
    }

    /// True when the file does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound { .. })
    }

    /// True when pull requests cannot be opened for this workspace.
    pub fn is_pull_request_unsupported(&self) -> bool {
        matches!(self, Self::PullRequestUnsupported { .. })
    }

    /// True when the sandbox's container is gone.
    pub fn is_container_not_found(&self) -> bool {
        matches!(self, Self::Sandbox(e) if e.is_container_not_found())
    }
}
