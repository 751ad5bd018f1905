//! Domain-specific error types for sandbox operations.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings. Engine errors are mapped
//! into these variants and never leak past the lifecycle manager.

use super::types::SandboxStatus;

/// Errors that can occur during sandbox operations.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Container engine is not running or not accessible.
    #[error("Container engine is not available: {message}")]
    DockerUnavailable { message: String },

    /// Container is stale or was removed.
    #[error("Container not found: {id}")]
    ContainerNotFound { id: String },

    /// Named volume does not exist.
    #[error("Volume not found: {name}")]
    VolumeNotFound { name: String },

    /// A container or volume with this name already exists.
    #[error("Sandbox resource already exists: {name}")]
    AlreadyExists { name: String },

    /// Lifecycle operation not allowed from the current status.
    #[error("Cannot move sandbox from {from} to {to}")]
    InvalidTransition {
        from: SandboxStatus,
        to: SandboxStatus,
    },

    /// Container operation failed (create, start, exec, etc.).
    #[error("Container operation failed: {message}")]
    ContainerFailed { message: String },

    /// The worker task running an engine call panicked or was cancelled.
    #[error("Engine task failed: {message}")]
    EngineTaskFailed { message: String },

    /// An engine call, or the wait for a free engine slot, ran out of time.
    #[error("Engine call timed out after {secs}s")]
    EngineTimeout { secs: u64 },
}

impl SandboxError {
    /// Creates a `DockerUnavailable` error.
    pub fn docker_unavailable(message: impl Into<String>) -> Self {
        Self::DockerUnavailable {
            message: message.into(),
        }
    }

    /// Creates a `ContainerNotFound` error.
    pub fn container_not_found(id: impl Into<String>) -> Self {
        Self::ContainerNotFound { id: id.into() }
    }

    /// Creates a `VolumeNotFound` error.
    pub fn volume_not_found(name: impl Into<String>) -> Self {
        Self::VolumeNotFound { name: name.into() }
    }

    /// Creates an `AlreadyExists` error.
    pub fn already_exists(name: impl Into<String>) -> Self {
        Self::AlreadyExists { name: name.into() }
    }

    /// Creates an `InvalidTransition` error.
    pub fn invalid_transition(from: SandboxStatus, to: SandboxStatus) -> Self {
        Self::InvalidTransition { from, to }
    }

    /// Creates a `ContainerFailed` error.
    pub fn container_failed(message: impl Into<String>) -> Self {
        Self::ContainerFailed {
            message: message.into(),
        }
    }

    /// Creates an `EngineTaskFailed` error.
    pub fn engine_task_failed(message: impl Into<String>) -> Self {
        Self::EngineTaskFailed {
            message: message.into(),
        }
    }

    /// Creates an `EngineTimeout` error.
    pub fn engine_timeout(limit: std::time::Duration) -> Self {
        Self::EngineTimeout {
            secs: limit.as_secs(),
        }
    }

    /// Returns true if the container is gone.
    pub fn is_container_not_found(&self) -> bool {
        matches!(self, Self::ContainerNotFound { .. })
    }

    /// Returns true if the volume is gone.
    pub fn is_volume_not_found(&self) -> bool {
        matches!(self, Self::VolumeNotFound { .. })
    }

    /// Returns true if an engine call ran out of time.
    pub fn is_engine_timeout(&self) -> bool {
        matches!(self, Self::EngineTimeout { .. })
    }

    /// Returns true if this is an engine unavailability error.
    pub fn is_docker_unavailable(&self) -> bool {
        matches!(self, Self::DockerUnavailable { .. })
    }
}
