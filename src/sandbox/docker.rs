//! Docker engine client built on bollard.

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::ContainerStateStatusEnum;
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions};
use bollard::volume::CreateVolumeOptions;
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info};

use super::{
    short_id, ContainerRuntime, ContainerSpec, ContainerState, ContainerStatus, ExecResult,
    NetworkPolicy, SandboxError,
};

/// Runs sandboxes as Docker containers with named volumes.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon and check that it answers.
    pub async fn connect() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            SandboxError::docker_unavailable(format!("Failed to connect to Docker: {e}"))
        })?;

        docker.ping().await.map_err(|e| {
            SandboxError::docker_unavailable(format!(
                "Cannot ping Docker daemon. Is Docker running? ({e})"
            ))
        })?;

        Ok(Self { docker })
    }

    /// Wrap an existing client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

fn status_code(e: &BollardError) -> Option<u16> {
    match e {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

/// Map an error from a call addressing container `id`.
fn container_error(id: &str, e: BollardError) -> SandboxError {
    match status_code(&e) {
        Some(404) => SandboxError::container_not_found(id),
        _ => SandboxError::container_failed(e.to_string()),
    }
}

fn convert_state(status: Option<ContainerStateStatusEnum>) -> ContainerState {
    match status {
        Some(ContainerStateStatusEnum::CREATED) => ContainerState::Created,
        Some(ContainerStateStatusEnum::RUNNING) => ContainerState::Running,
        Some(ContainerStateStatusEnum::PAUSED) => ContainerState::Paused,
        Some(ContainerStateStatusEnum::RESTARTING) => ContainerState::Restarting,
        Some(ContainerStateStatusEnum::REMOVING) => ContainerState::Removing,
        Some(ContainerStateStatusEnum::EXITED) => ContainerState::Exited,
        Some(ContainerStateStatusEnum::DEAD) => ContainerState::Dead,
        _ => ContainerState::Unknown,
    }
}

fn build_container_config(spec: &ContainerSpec) -> ContainerConfig<String> {
    let host_config = bollard::service::HostConfig {
        binds: Some(vec![format!(
            "{}:{}:rw",
            spec.volume_name, spec.workspace_root
        )]),
        memory: Some(mib_to_bytes(spec.limits.memory_mb)),
        nano_cpus: Some(cpus_to_nano(spec.limits.cpus)),
        privileged: Some(false),
        security_opt: Some(vec!["no-new-privileges:true".to_string()]),
        network_mode: Some(spec.network_policy.network_mode(&spec.network)),
        ..Default::default()
    };

    ContainerConfig {
        image: Some(spec.image.clone()),
        cmd: Some(spec.command.clone()),
        working_dir: Some(spec.workspace_root.clone()),
        labels: Some(spec.labels.clone()),
        tty: Some(false),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn mib_to_bytes(mb: u64) -> i64 {
    i64::try_from(mb.saturating_mul(1024 * 1024)).unwrap_or(i64::MAX)
}

#[allow(clippy::cast_possible_truncation)]
fn cpus_to_nano(cpus: f64) -> i64 {
    (cpus.max(0.01) * 1_000_000_000.0) as i64
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ensure_network(
        &self,
        name: &str,
        policy: NetworkPolicy,
        labels: &HashMap<String, String>,
    ) -> Result<(), SandboxError> {
        if !policy.needs_network() {
            return Ok(());
        }

        match self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) if status_code(&e) == Some(404) => {}
            Err(e) => return Err(SandboxError::container_failed(e.to_string())),
        }

        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            internal: policy.is_internal(),
            labels: labels.clone(),
            ..Default::default()
        };

        match self.docker.create_network(options).await {
            Ok(_) => {
                info!("Created Docker network: {} ({})", name, policy);
                Ok(())
            }
            // Lost a creation race with another caller
            Err(e) if status_code(&e) == Some(409) => Ok(()),
            Err(e) => Err(SandboxError::container_failed(format!(
                "Failed to create network {name}: {e}"
            ))),
        }
    }

    async fn create_volume(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<(), SandboxError> {
        let options = CreateVolumeOptions {
            name: name.to_string(),
            driver: "local".to_string(),
            driver_opts: HashMap::new(),
            labels: labels.clone(),
        };

        self.docker
            .create_volume(options)
            .await
            .map_err(|e| SandboxError::container_failed(format!("Failed to create volume: {e}")))?;

        debug!("Created volume: {}", name);
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), SandboxError> {
        match self.docker.remove_volume(name, None).await {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => Err(SandboxError::volume_not_found(name)),
            Err(e) => Err(SandboxError::container_failed(format!(
                "Failed to remove volume {name}: {e}"
            ))),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        debug!("Creating container: {}", spec.name);

        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                build_container_config(spec),
            )
            .await
            .map_err(|e| match status_code(&e) {
                Some(409) => SandboxError::already_exists(spec.name.clone()),
                Some(404) => SandboxError::container_failed(format!(
                    "Container image not found: {}",
                    spec.image
                )),
                _ => SandboxError::container_failed(format!("Failed to create container: {e}")),
            })?;

        for warning in &response.warnings {
            debug!("Docker warning for {}: {}", spec.name, warning);
        }

        if let Err(e) = self.start_container(&response.id).await {
            let _ = self.remove_container(&response.id).await;
            return Err(e);
        }

        info!(
            "Container created: {} ({})",
            spec.name,
            short_id(&response.id)
        );
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), SandboxError> {
        match self
            .docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            // Already running
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) => Err(container_error(id, e)),
        }
    }

    async fn stop_container(&self, id: &str, grace_secs: u64) -> Result<(), SandboxError> {
        let options = StopContainerOptions {
            t: i64::try_from(grace_secs).unwrap_or(i64::MAX),
        };

        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(304) => {
                debug!("Container {} already stopped", short_id(id));
                Ok(())
            }
            Err(e) => Err(container_error(id, e)),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), SandboxError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| container_error(id, e))
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerStatus, SandboxError> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| container_error(id, e))?;

        let state = convert_state(inspect.state.and_then(|s| s.status));
        Ok(ContainerStatus {
            state,
            short_id: inspect.id.as_deref().map(|i| short_id(i).to_string()),
            name: inspect.name.map(|n| n.trim_start_matches('/').to_string()),
        })
    }

    async fn exec(
        &self,
        id: &str,
        argv: &[String],
        workdir: &str,
    ) -> Result<ExecResult, SandboxError> {
        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(argv.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some(workdir.to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| container_error(id, e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        if let StartExecResults::Attached { mut output, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| container_error(id, e))?
        {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => stdout.extend_from_slice(&message),
                    Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                    Ok(_) => {}
                    Err(e) => return Err(container_error(id, e)),
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| container_error(id, e))?;

        let exit_code = inspect.exit_code.ok_or_else(|| {
            SandboxError::container_failed("Exec finished without an exit code")
        })?;

        Ok(ExecResult {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ResourceLimits;

    fn spec(policy: NetworkPolicy) -> ContainerSpec {
        ContainerSpec {
            name: "workcell-sandbox-abcd1234".to_string(),
            image: "workcell/sandbox:latest".to_string(),
            command: vec!["sleep".to_string(), "infinity".to_string()],
            volume_name: "workcell-sandbox-abcd1234-full".to_string(),
            workspace_root: "/workspace".to_string(),
            network: "workcell-sandbox".to_string(),
            network_policy: policy,
            limits: ResourceLimits {
                cpus: 1.5,
                memory_mb: 512,
                disk_mb: 2048,
            },
            labels: HashMap::from([("workcell.managed".to_string(), "true".to_string())]),
        }
    }

    #[test]
    fn test_container_config_limits_and_security() {
        let config = build_container_config(&spec(NetworkPolicy::Bridge));
        let host = config.host_config.unwrap();

        assert_eq!(host.memory, Some(512 * 1024 * 1024));
        assert_eq!(host.nano_cpus, Some(1_500_000_000));
        assert_eq!(host.privileged, Some(false));
        assert_eq!(
            host.binds,
            Some(vec![
                "workcell-sandbox-abcd1234-full:/workspace:rw".to_string()
            ])
        );
        assert_eq!(host.network_mode.as_deref(), Some("workcell-sandbox"));
        assert_eq!(config.working_dir.as_deref(), Some("/workspace"));
        assert_eq!(
            config.labels.unwrap().get("workcell.managed").map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn test_container_config_without_network() {
        let config = build_container_config(&spec(NetworkPolicy::None));
        assert_eq!(
            config.host_config.unwrap().network_mode.as_deref(),
            Some("none")
        );
    }

    #[test]
    fn test_convert_state() {
        assert_eq!(
            convert_state(Some(ContainerStateStatusEnum::RUNNING)),
            ContainerState::Running
        );
        assert_eq!(
            convert_state(Some(ContainerStateStatusEnum::EXITED)),
            ContainerState::Exited
        );
        assert_eq!(convert_state(None), ContainerState::Unknown);
    }

    #[test]
    fn test_not_found_maps_to_container_not_found() {
        let err = container_error(
            "abc",
            BollardError::DockerResponseServerError {
                status_code: 404,
                message: "No such container".to_string(),
            },
        );
        assert!(err.is_container_not_found());

        let err = container_error(
            "abc",
            BollardError::DockerResponseServerError {
                status_code: 500,
                message: "boom".to_string(),
            },
        );
        assert!(!err.is_container_not_found());
    }
}
