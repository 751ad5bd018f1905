//! Container-backed sandboxes.
//!
//! A [`ContainerRuntime`] is the thin client over a container engine. The
//! [`SandboxManager`] owns the mapping from a logical [`Sandbox`] to its
//! container and volume, drives the lifecycle state machine, and runs every
//! engine call through a bounded worker pool with a wall-clock timeout on
//! command execution.

mod docker;
mod error;
mod local;
mod manager;
mod network;
mod pool;
mod types;

pub use docker::DockerRuntime;
pub use error::SandboxError;
pub use local::LocalRuntime;
pub use manager::SandboxManager;
pub use network::NetworkPolicy;
#[cfg(test)]
pub(crate) use manager::tests as test_support;
pub use types::{
    short_id, ContainerState, ContainerStatus, ExecResult, ResourceLimits, Sandbox,
    SandboxStatus, TIMEOUT_EXIT_CODE,
};

use async_trait::async_trait;
use std::collections::HashMap;

/// Everything the engine needs to create one sandbox container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image to run.
    pub image: String,
    /// Keep-alive command.
    pub command: Vec<String>,
    /// Volume mounted at `workspace_root`.
    pub volume_name: String,
    /// Mount point of the volume, also the container's working directory.
    pub workspace_root: String,
    /// Network to attach to.
    pub network: String,
    /// How the container reaches the network.
    pub network_policy: NetworkPolicy,
    /// CPU and memory ceilings.
    pub limits: ResourceLimits,
    /// Management labels.
    pub labels: HashMap<String, String>,
}

/// Thin client over a container engine.
///
/// Implementations map engine failures onto [`SandboxError`]: a missing
/// container is `ContainerNotFound`, a missing volume `VolumeNotFound`, a name
/// clash `AlreadyExists`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Engine name for logs.
    fn name(&self) -> &'static str;

    /// Create the sandbox network if it does not exist yet.
    async fn ensure_network(
        &self,
        name: &str,
        policy: NetworkPolicy,
        labels: &HashMap<String, String>,
    ) -> Result<(), SandboxError>;

    /// Create a named volume.
    async fn create_volume(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<(), SandboxError>;

    /// Remove a named volume.
    async fn remove_volume(&self, name: &str) -> Result<(), SandboxError>;

    /// Create and start a container, returning its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, SandboxError>;

    /// Start a created or stopped container.
    async fn start_container(&self, id: &str) -> Result<(), SandboxError>;

    /// Stop a container. Stopping an already stopped container succeeds.
    async fn stop_container(&self, id: &str, grace_secs: u64) -> Result<(), SandboxError>;

    /// Remove a container, killing it first if it is running.
    async fn remove_container(&self, id: &str) -> Result<(), SandboxError>;

    /// Report a container's state.
    async fn inspect_container(&self, id: &str) -> Result<ContainerStatus, SandboxError>;

    /// Run `argv` in `workdir` and wait for it, separating stdout and stderr.
    async fn exec(
        &self,
        id: &str,
        argv: &[String],
        workdir: &str,
    ) -> Result<ExecResult, SandboxError>;
}
