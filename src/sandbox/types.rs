//! Sandbox data model: the logical sandbox, its status machine, and exec results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Exit code reported when a command exceeded its wall-clock bound.
pub const TIMEOUT_EXIT_CODE: i64 = -1;

/// Lifecycle status of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    /// Container and volume are being set up.
    Creating,
    /// Container is up and accepts commands.
    Running,
    /// Container is stopped; the volume is kept.
    Stopped,
    /// The last lifecycle operation failed.
    Error,
    /// Container and volume are being removed.
    Destroying,
}

impl SandboxStatus {
    /// Whether a lifecycle operation may move a sandbox from `self` to `next`.
    ///
    /// `creating → running ⇄ stopped → destroying`, with `error` reachable from
    /// anywhere. A running or failed sandbox may be destroyed directly, and a
    /// failed one may be started again.
    pub fn can_transition_to(self, next: Self) -> bool {
        use SandboxStatus::{Creating, Destroying, Error, Running, Stopped};
        match (self, next) {
            (_, Error) => true,
            (Creating, Running | Destroying)
            | (Running, Stopped | Destroying)
            | (Stopped, Running | Destroying)
            | (Error, Running | Destroying) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
            Self::Destroying => write!(f, "destroying"),
        }
    }
}

/// CPU, memory and disk limits of one sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU share.
    pub cpus: f64,
    /// Memory ceiling in MiB.
    pub memory_mb: u64,
    /// Disk allowance in MiB, recorded only.
    pub disk_mb: u64,
}

/// One project's execution environment: a container plus its persistent volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sandbox {
    /// Sandbox id.
    pub id: Uuid,
    /// Project the sandbox belongs to.
    pub project_id: String,
    /// Unset until provisioned and after destruction.
    pub container_id: Option<String>,
    /// Lifecycle status.
    pub status: SandboxStatus,
    /// Volume holding the workspace.
    pub volume_name: String,
    /// Branch the workspace tracks.
    pub git_branch: String,
    /// Resource limits applied at creation.
    pub limits: ResourceLimits,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Sandbox {
    pub(crate) fn new(
        project_id: &str,
        volume_name: String,
        git_branch: &str,
        limits: ResourceLimits,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.to_string(),
            container_id: None,
            status: SandboxStatus::Creating,
            volume_name,
            git_branch: git_branch.to_string(),
            limits,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of running one command inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    /// Process exit code, or -1 on timeout.
    pub exit_code: i64,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ExecResult {
    /// Result reported when the command outlived its timeout. The command may
    /// still be running.
    pub fn timed_out(timeout: Duration) -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            stdout: String::new(),
            stderr: format!("Command timed out after {} seconds", timeout.as_secs()),
        }
    }

    /// True for exit code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// True when the command outlived its timeout.
    pub fn is_timeout(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }

    /// Stdout followed by stderr.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    /// Stderr if present, else stdout. Used for failure messages.
    pub fn error_output(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Observed engine-side state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    /// Created, never started.
    Created,
    /// Running.
    Running,
    /// Paused.
    Paused,
    /// Restarting.
    Restarting,
    /// Exited.
    Exited,
    /// Dead.
    Dead,
    /// Being removed.
    Removing,
    /// No such container.
    NotFound,
    /// A state the engine reported that is not listed here.
    Unknown,
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Removing => "removing",
            Self::NotFound => "not_found",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Status report for a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    /// Engine-observed state.
    pub state: ContainerState,
    /// First 12 characters of the container id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_id: Option<String>,
    /// Container name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ContainerStatus {
    /// Status of a container that does not exist.
    pub fn not_found() -> Self {
        Self {
            state: ContainerState::NotFound,
            short_id: None,
            name: None,
        }
    }
}

/// First 12 characters of a container id, as shown by `docker ps`.
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        use SandboxStatus::*;
        assert!(Creating.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopped));
        assert!(Stopped.can_transition_to(Running));
        assert!(Stopped.can_transition_to(Destroying));
        assert!(Running.can_transition_to(Destroying));

        assert!(!Creating.can_transition_to(Stopped));
        assert!(!Running.can_transition_to(Running));
        assert!(!Destroying.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Creating));
    }

    #[test]
    fn test_error_reachable_from_any_state() {
        use SandboxStatus::*;
        for status in [Creating, Running, Stopped, Error, Destroying] {
            assert!(status.can_transition_to(Error), "{status} -> error");
        }
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&SandboxStatus::Destroying).unwrap();
        assert_eq!(json, "\"destroying\"");
    }

    #[test]
    fn test_timed_out_result() {
        let result = ExecResult::timed_out(Duration::from_secs(5));
        assert!(result.is_timeout());
        assert!(!result.success());
        assert_eq!(result.stderr, "Command timed out after 5 seconds");
    }

    #[test]
    fn test_error_output_prefers_stderr() {
        let result = ExecResult {
            exit_code: 1,
            stdout: "out".to_string(),
            stderr: " err \n".to_string(),
        };
        assert_eq!(result.error_output(), "err");

        let result = ExecResult {
            exit_code: 1,
            stdout: "out\n".to_string(),
            stderr: String::new(),
        };
        assert_eq!(result.error_output(), "out");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_new_sandbox_starts_creating() {
        let limits = ResourceLimits {
            cpus: 1.0,
            memory_mb: 512,
            disk_mb: 2048,
        };
        let sandbox = Sandbox::new("p1", "vol".to_string(), "main", limits);
        assert_eq!(sandbox.status, SandboxStatus::Creating);
        assert!(sandbox.container_id.is_none());
        assert_eq!(sandbox.git_branch, "main");
    }
}
