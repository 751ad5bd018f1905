//! Sandbox lifecycle: provisioning, start/stop/destroy, and command execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::pool::{flatten, EnginePool};
use super::{
    short_id, ContainerRuntime, ContainerSpec, ContainerStatus, DockerRuntime, ExecResult,
    LocalRuntime, ResourceLimits, Sandbox, SandboxError, SandboxStatus,
};
use crate::config::{Config, Engine, SandboxConfig};

/// Branch a blank sandbox starts on.
pub const BLANK_BRANCH: &str = "main";

/// Owns the mapping from logical sandboxes to containers and volumes.
pub struct SandboxManager {
    runtime: Arc<dyn ContainerRuntime>,
    pool: EnginePool,
    config: SandboxConfig,
}

impl SandboxManager {
    /// Manager over `runtime`, running at most `max_concurrent_ops` engine calls at once.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        config: SandboxConfig,
        max_concurrent_ops: usize,
    ) -> Self {
        Self {
            runtime,
            pool: EnginePool::new(
                max_concurrent_ops,
                Duration::from_secs(config.resources.engine_timeout_secs),
            ),
            config,
        }
    }

    /// Build a manager for the engine selected in `config`.
    pub async fn connect(config: &Config) -> Result<Self, SandboxError> {
        let runtime: Arc<dyn ContainerRuntime> = match config.runtime.engine {
            Engine::Docker => Arc::new(DockerRuntime::connect().await?),
            Engine::Local => Arc::new(LocalRuntime::new(
                &config.runtime.local_root,
                config.sandbox.workspace_root.clone(),
            )),
        };
        debug!("Using {} engine", runtime.name());
        Ok(Self::new(
            runtime,
            config.sandbox.clone(),
            config.runtime.max_concurrent_ops,
        ))
    }

    /// Path of the workspace inside every sandbox.
    pub fn workspace_root(&self) -> &str {
        &self.config.workspace_root
    }

    /// Timeout for commands that don't pick their own.
    pub fn default_exec_timeout(&self) -> Duration {
        Duration::from_secs(self.config.resources.exec_timeout_secs)
    }

    /// Volume name for a project.
    pub fn volume_name(&self, project_id: &str) -> String {
        format!("{}-sandbox-{}", self.config.label_prefix, project_id)
    }

    /// Container name for a project, from the first 8 characters of its id.
    pub fn container_name(&self, project_id: &str) -> String {
        let short: String = project_id.chars().take(8).collect();
        format!("{}-sandbox-{}", self.config.label_prefix, short)
    }

    fn labels(&self, volume_name: Option<&str>) -> HashMap<String, String> {
        let prefix = &self.config.label_prefix;
        let mut labels = HashMap::from([(format!("{prefix}.managed"), "true".to_string())]);
        if let Some(volume) = volume_name {
            labels.insert(format!("{prefix}.volume"), volume.to_string());
        }
        labels
    }

    fn limits(&self) -> ResourceLimits {
        let resources = &self.config.resources;
        ResourceLimits {
            cpus: resources.cpus,
            memory_mb: resources.memory_mb,
            disk_mb: resources.disk_mb,
        }
    }

    /// Create the volume and a running container for `project_id`.
    async fn provision(&self, project_id: &str, git_branch: &str) -> Result<Sandbox, SandboxError> {
        let volume_name = self.volume_name(project_id);
        let mut sandbox = Sandbox::new(project_id, volume_name.clone(), git_branch, self.limits());

        let network = self.config.network.clone();
        let policy = self.config.network_policy;
        let labels = self.labels(None);
        let runtime = Arc::clone(&self.runtime);
        self.pool
            .run(async move { runtime.ensure_network(&network, policy, &labels).await })
            .await?;

        let labels = self.labels(Some(&volume_name));
        let runtime = Arc::clone(&self.runtime);
        let volume = volume_name.clone();
        self.pool
            .run(async move { runtime.create_volume(&volume, &labels).await })
            .await?;

        let spec = ContainerSpec {
            name: self.container_name(project_id),
            image: self.config.image.clone(),
            command: self.config.command.clone(),
            volume_name: volume_name.clone(),
            workspace_root: self.config.workspace_root.clone(),
            network: self.config.network.clone(),
            network_policy: self.config.network_policy,
            limits: sandbox.limits,
            labels: self.labels(Some(&volume_name)),
        };

        let runtime = Arc::clone(&self.runtime);
        let created = self
            .pool
            .run(async move { runtime.create_container(&spec).await })
            .await;

        match created {
            Ok(container_id) => {
                sandbox.container_id = Some(container_id);
                sandbox.status = SandboxStatus::Running;
                Ok(sandbox)
            }
            // The volume may belong to the sandbox that holds the name
            Err(e @ SandboxError::AlreadyExists { .. }) => Err(e),
            Err(e) => {
                error!("Provisioning {} failed: {}", project_id, e);
                let runtime = Arc::clone(&self.runtime);
                let volume = volume_name.clone();
                if let Err(cleanup) = self
                    .pool
                    .run(async move { runtime.remove_volume(&volume).await })
                    .await
                {
                    warn!("Failed to clean up volume {}: {}", volume_name, cleanup);
                }
                Err(e)
            }
        }
    }

    /// Create a sandbox and clone `remote_url` into its workspace.
    ///
    /// A failed clone is logged and the sandbox is still returned running, so
    /// the caller can inspect or retry from inside it.
    pub async fn create_from_clone(
        &self,
        project_id: &str,
        remote_url: Option<&str>,
        default_branch: &str,
    ) -> Result<Sandbox, SandboxError> {
        info!("Creating sandbox for project {} (cloned)", project_id);
        let sandbox = self.provision(project_id, default_branch).await?;
        let container_id = sandbox.container_id.clone().unwrap_or_default();

        if let Some(url) = remote_url {
            let argv = [
                "git".to_string(),
                "clone".to_string(),
                url.to_string(),
                ".".to_string(),
            ];
            let timeout = Duration::from_secs(self.config.resources.clone_timeout_secs);
            match self.exec_command(&container_id, &argv, timeout, None).await {
                Ok(result) if result.success() => {}
                Ok(result) => warn!("Git clone failed: {}", result.error_output()),
                Err(e) => warn!("Git clone failed: {}", e),
            }
        }

        info!(
            "Sandbox created: {} (container: {})",
            sandbox.id,
            short_id(&container_id)
        );
        Ok(sandbox)
    }

    /// Create a sandbox with an empty repository on `main`.
    pub async fn create_blank(&self, project_id: &str) -> Result<Sandbox, SandboxError> {
        info!("Creating blank sandbox for project {}", project_id);
        let sandbox = self.provision(project_id, BLANK_BRANCH).await?;
        let container_id = sandbox.container_id.clone().unwrap_or_default();

        let head = format!("refs/heads/{BLANK_BRANCH}");
        let steps: [&[&str]; 2] = [
            &["git", "init"],
            &["git", "symbolic-ref", "HEAD", head.as_str()],
        ];
        for step in steps {
            let argv: Vec<String> = step.iter().map(|s| (*s).to_string()).collect();
            let failure = match self
                .exec_command(&container_id, &argv, self.default_exec_timeout(), None)
                .await
            {
                Ok(result) if result.success() => continue,
                Ok(result) => result.error_output().to_string(),
                Err(e) => e.to_string(),
            };
            warn!("{} failed: {}", argv.join(" "), failure);
            break;
        }

        info!(
            "Blank sandbox created: {} (container: {})",
            sandbox.id,
            short_id(&container_id)
        );
        Ok(sandbox)
    }

    fn check_transition(sandbox: &Sandbox, next: SandboxStatus) -> Result<(), SandboxError> {
        if sandbox.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(SandboxError::invalid_transition(sandbox.status, next))
        }
    }

    fn container_of(sandbox: &Sandbox) -> Result<String, SandboxError> {
        sandbox
            .container_id
            .clone()
            .ok_or_else(|| SandboxError::container_not_found(sandbox.id.to_string()))
    }

    /// Start a stopped (or failed) sandbox. Workspace contents are preserved.
    pub async fn start(&self, sandbox: &mut Sandbox) -> Result<(), SandboxError> {
        Self::check_transition(sandbox, SandboxStatus::Running)?;
        let container_id = Self::container_of(sandbox)?;
        match self.start_container(&container_id).await {
            Ok(()) => {
                sandbox.status = SandboxStatus::Running;
                Ok(())
            }
            Err(e) => {
                sandbox.status = SandboxStatus::Error;
                Err(e)
            }
        }
    }

    /// Stop a running sandbox. The volume is kept.
    pub async fn stop(&self, sandbox: &mut Sandbox) -> Result<(), SandboxError> {
        Self::check_transition(sandbox, SandboxStatus::Stopped)?;
        let container_id = Self::container_of(sandbox)?;
        match self.stop_container(&container_id).await {
            Ok(()) => {
                sandbox.status = SandboxStatus::Stopped;
                Ok(())
            }
            Err(e) => {
                sandbox.status = SandboxStatus::Error;
                Err(e)
            }
        }
    }

    /// Remove the sandbox's container and volume.
    pub async fn destroy(&self, sandbox: &mut Sandbox) -> Result<(), SandboxError> {
        if sandbox.status != SandboxStatus::Destroying {
            Self::check_transition(sandbox, SandboxStatus::Destroying)?;
        }
        sandbox.status = SandboxStatus::Destroying;

        let container_id = sandbox.container_id.clone().unwrap_or_default();
        match self
            .destroy_container(&container_id, Some(&sandbox.volume_name))
            .await
        {
            Ok(()) => {
                sandbox.container_id = None;
                Ok(())
            }
            Err(e) => {
                sandbox.status = SandboxStatus::Error;
                Err(e)
            }
        }
    }

    /// Start a container by id.
    pub async fn start_container(&self, container_id: &str) -> Result<(), SandboxError> {
        info!("Starting sandbox container: {}", short_id(container_id));
        let runtime = Arc::clone(&self.runtime);
        let id = container_id.to_string();
        self.pool
            .run(async move { runtime.start_container(&id).await })
            .await
    }

    /// Stop a container. A container that no longer exists counts as stopped.
    pub async fn stop_container(&self, container_id: &str) -> Result<(), SandboxError> {
        info!("Stopping sandbox container: {}", short_id(container_id));
        let runtime = Arc::clone(&self.runtime);
        let id = container_id.to_string();
        let grace = self.config.resources.stop_grace_secs;
        match self
            .pool
            .run(async move { runtime.stop_container(&id, grace).await })
            .await
        {
            Err(e) if e.is_container_not_found() => {
                warn!(
                    "Container {} not found (already removed?)",
                    short_id(container_id)
                );
                Ok(())
            }
            other => other,
        }
    }

    /// Force-remove a container and, if given, its volume. Each removal
    /// succeeds when the resource is already gone.
    pub async fn destroy_container(
        &self,
        container_id: &str,
        volume_name: Option<&str>,
    ) -> Result<(), SandboxError> {
        info!("Destroying sandbox container: {}", short_id(container_id));

        if !container_id.is_empty() {
            let runtime = Arc::clone(&self.runtime);
            let id = container_id.to_string();
            match self
                .pool
                .run(async move { runtime.remove_container(&id).await })
                .await
            {
                Ok(()) => info!("Container removed: {}", short_id(container_id)),
                Err(e) if e.is_container_not_found() => {
                    warn!("Container {} already removed", short_id(container_id));
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(volume) = volume_name {
            let runtime = Arc::clone(&self.runtime);
            let name = volume.to_string();
            match self
                .pool
                .run(async move { runtime.remove_volume(&name).await })
                .await
            {
                Ok(()) => info!("Volume removed: {}", volume),
                Err(e) if e.is_volume_not_found() => warn!("Volume {} already removed", volume),
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Run `argv` inside the container, bounded by `timeout`.
    ///
    /// `workdir` defaults to the workspace root. When the timeout expires the
    /// result has exit code -1 and the engine call is left running detached.
    pub async fn exec_command(
        &self,
        container_id: &str,
        argv: &[String],
        timeout: Duration,
        workdir: Option<&str>,
    ) -> Result<ExecResult, SandboxError> {
        let runtime = Arc::clone(&self.runtime);
        let id = container_id.to_string();
        let args = argv.to_vec();
        let dir = workdir.unwrap_or(&self.config.workspace_root).to_string();

        debug!("exec in {}: {:?}", short_id(container_id), argv);
        let handle = self
            .pool
            .spawn(timeout, async move { runtime.exec(&id, &args, &dir).await });

        match tokio::time::timeout(timeout, handle).await {
            Ok(joined) => match flatten(joined) {
                // No engine slot freed up in time
                Err(e) if e.is_engine_timeout() => {
                    warn!("No engine slot for {}s: {}", timeout.as_secs(), argv.join(" "));
                    Ok(ExecResult::timed_out(timeout))
                }
                other => other,
            },
            Err(_) => {
                warn!(
                    "Command timed out after {}s: {}",
                    timeout.as_secs(),
                    argv.join(" ")
                );
                Ok(ExecResult::timed_out(timeout))
            }
        }
    }

    /// Report the container's state. A missing container is `not_found`.
    pub async fn status(&self, container_id: &str) -> Result<ContainerStatus, SandboxError> {
        let runtime = Arc::clone(&self.runtime);
        let id = container_id.to_string();
        match self
            .pool
            .run(async move { runtime.inspect_container(&id).await })
            .await
        {
            Err(e) if e.is_container_not_found() => Ok(ContainerStatus::not_found()),
            other => other,
        }
    }

    /// Pull `branch` from origin into the workspace.
    pub async fn sync_repo(
        &self,
        container_id: &str,
        branch: &str,
    ) -> Result<ExecResult, SandboxError> {
        let argv = [
            "git".to_string(),
            "pull".to_string(),
            "origin".to_string(),
            branch.to_string(),
        ];
        let timeout = Duration::from_secs(self.config.resources.sync_timeout_secs);
        self.exec_command(container_id, &argv, timeout, None).await
    }
}
