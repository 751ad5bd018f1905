//! Host-process engine for development and tests.
//!
//! A "container" is a directory (its volume) plus a running flag. Commands run
//! as ordinary host processes with the workspace root mapped onto the volume
//! directory. There is no isolation: use the Docker engine for untrusted code.
//! The container table is kept in `containers.json` under the engine root so
//! separate processes see the same containers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    short_id, ContainerRuntime, ContainerSpec, ContainerState, ContainerStatus, ExecResult,
    NetworkPolicy, SandboxError,
};

const CONTAINERS_FILE: &str = "containers.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalContainer {
    name: String,
    volume: String,
    running: bool,
}

/// Engine running sandbox commands directly on the host.
#[derive(Debug)]
pub struct LocalRuntime {
    root: PathBuf,
    workspace_root: String,
    containers: Mutex<HashMap<String, LocalContainer>>,
}

impl LocalRuntime {
    /// Volumes live under `root/volumes`. `workspace_root` is the in-sandbox
    /// path callers use as workdir; it maps onto the volume directory.
    pub fn new(root: impl Into<PathBuf>, workspace_root: impl Into<String>) -> Self {
        let root = root.into();
        let containers = load_containers(&root);
        Self {
            root,
            workspace_root: workspace_root.into(),
            containers: Mutex::new(containers),
        }
    }

    fn save(&self, containers: &HashMap<String, LocalContainer>) -> Result<(), SandboxError> {
        let path = self.root.join(CONTAINERS_FILE);
        let content = serde_json::to_string_pretty(containers)
            .map_err(|e| SandboxError::container_failed(e.to_string()))?;
        std::fs::create_dir_all(&self.root)
            .and_then(|()| std::fs::write(&path, content))
            .map_err(|e| {
                SandboxError::container_failed(format!(
                    "Failed to write {}: {e}",
                    path.display()
                ))
            })
    }

    /// Host directory backing a volume.
    pub fn volume_path(&self, volume: &str) -> PathBuf {
        self.root.join("volumes").join(volume)
    }

    fn map_workdir(&self, volume: &str, workdir: &str) -> Result<PathBuf, SandboxError> {
        let base = self.volume_path(volume);
        let root = self.workspace_root.trim_end_matches('/');
        let rest = if workdir == root || workdir.is_empty() {
            ""
        } else if let Some(rest) = workdir.strip_prefix(root).and_then(|r| r.strip_prefix('/')) {
            rest
        } else {
            return Err(SandboxError::container_failed(format!(
                "Working directory {workdir} is outside {root}"
            )));
        };

        if Path::new(rest)
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            return Err(SandboxError::container_failed(format!(
                "Invalid working directory: {workdir}"
            )));
        }
        Ok(base.join(rest))
    }
}

fn load_containers(root: &Path) -> HashMap<String, LocalContainer> {
    let path = root.join(CONTAINERS_FILE);
    let Ok(content) = std::fs::read_to_string(&path) else {
        return HashMap::new();
    };
    serde_json::from_str(&content).unwrap_or_else(|e| {
        warn!("Ignoring unreadable {}: {}", path.display(), e);
        HashMap::new()
    })
}

#[async_trait]
impl ContainerRuntime for LocalRuntime {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn ensure_network(
        &self,
        name: &str,
        policy: NetworkPolicy,
        _labels: &HashMap<String, String>,
    ) -> Result<(), SandboxError> {
        debug!("Local engine ignores network {} ({})", name, policy);
        Ok(())
    }

    async fn create_volume(
        &self,
        name: &str,
        _labels: &HashMap<String, String>,
    ) -> Result<(), SandboxError> {
        tokio::fs::create_dir_all(self.volume_path(name))
            .await
            .map_err(|e| SandboxError::container_failed(format!("Failed to create volume: {e}")))
    }

    async fn remove_volume(&self, name: &str) -> Result<(), SandboxError> {
        let path = self.volume_path(name);
        if !path.exists() {
            return Err(SandboxError::volume_not_found(name));
        }
        tokio::fs::remove_dir_all(&path).await.map_err(|e| {
            SandboxError::container_failed(format!("Failed to remove volume {name}: {e}"))
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        let mut containers = self.containers.lock().await;
        if containers.values().any(|c| c.name == spec.name) {
            return Err(SandboxError::already_exists(spec.name.clone()));
        }

        tokio::fs::create_dir_all(self.volume_path(&spec.volume_name))
            .await
            .map_err(|e| SandboxError::container_failed(e.to_string()))?;

        let id = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        containers.insert(
            id.clone(),
            LocalContainer {
                name: spec.name.clone(),
                volume: spec.volume_name.clone(),
                running: true,
            },
        );
        self.save(&containers)?;
        debug!("Local container {} ({})", spec.name, short_id(&id));
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), SandboxError> {
        let mut containers = self.containers.lock().await;
        let container = containers
            .get_mut(id)
            .ok_or_else(|| SandboxError::container_not_found(id))?;
        container.running = true;
        self.save(&containers)
    }

    async fn stop_container(&self, id: &str, _grace_secs: u64) -> Result<(), SandboxError> {
        let mut containers = self.containers.lock().await;
        let container = containers
            .get_mut(id)
            .ok_or_else(|| SandboxError::container_not_found(id))?;
        container.running = false;
        self.save(&containers)
    }

    async fn remove_container(&self, id: &str) -> Result<(), SandboxError> {
        let mut containers = self.containers.lock().await;
        if containers.remove(id).is_none() {
            return Err(SandboxError::container_not_found(id));
        }
        self.save(&containers)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerStatus, SandboxError> {
        let containers = self.containers.lock().await;
        let container = containers
            .get(id)
            .ok_or_else(|| SandboxError::container_not_found(id))?;
        Ok(ContainerStatus {
            state: if container.running {
                ContainerState::Running
            } else {
                ContainerState::Exited
            },
            short_id: Some(short_id(id).to_string()),
            name: Some(container.name.clone()),
        })
    }

    async fn exec(
        &self,
        id: &str,
        argv: &[String],
        workdir: &str,
    ) -> Result<ExecResult, SandboxError> {
        let container = self
            .containers
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SandboxError::container_not_found(id))?;

        if !container.running {
            return Err(SandboxError::container_failed(format!(
                "Container {} is not running",
                short_id(id)
            )));
        }

        let Some((program, args)) = argv.split_first() else {
            return Err(SandboxError::container_failed("Empty command"));
        };

        let dir = self.map_workdir(&container.volume, workdir)?;
        let output = Command::new(program)
            .args(args)
            .current_dir(&dir)
            .stdin(std::process::Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) => Ok(ExecResult {
                exit_code: output.status.code().map_or(137, i64::from),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            // Mirrors the engine's "executable file not found" exit status
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ExecResult {
                exit_code: 127,
                stdout: String::new(),
                stderr: format!("{program}: command not found"),
            }),
            Err(e) => Err(SandboxError::container_failed(format!(
                "Failed to run {program}: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ResourceLimits;
    use tempfile::TempDir;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: "unused".to_string(),
            command: vec![],
            volume_name: format!("{name}-vol"),
            workspace_root: "/workspace".to_string(),
            network: "unused".to_string(),
            network_policy: NetworkPolicy::None,
            limits: ResourceLimits {
                cpus: 1.0,
                memory_mb: 512,
                disk_mb: 2048,
            },
            labels: HashMap::new(),
        }
    }

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_map_workdir() {
        let runtime = LocalRuntime::new("/data", "/workspace");
        assert_eq!(
            runtime.map_workdir("v", "/workspace").unwrap(),
            PathBuf::from("/data/volumes/v")
        );
        assert_eq!(
            runtime.map_workdir("v", "/workspace/src/app").unwrap(),
            PathBuf::from("/data/volumes/v/src/app")
        );
        assert!(runtime.map_workdir("v", "/etc").is_err());
        assert!(runtime.map_workdir("v", "/workspace-other").is_err());
        assert!(runtime.map_workdir("v", "/workspace/../x").is_err());
    }

    #[tokio::test]
    async fn test_exec_in_volume_directory() {
        let dir = TempDir::new().unwrap();
        let runtime = LocalRuntime::new(dir.path(), "/workspace");
        let id = runtime.create_container(&spec("c1")).await.unwrap();

        let result = runtime
            .exec(
                &id,
                &argv(&["sh", "-c", "echo hi > f.txt; cat f.txt; echo oops >&2; exit 3"]),
                "/workspace",
            )
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.stderr, "oops\n");
        assert!(runtime.volume_path("c1-vol").join("f.txt").exists());
    }

    #[tokio::test]
    async fn test_stopped_container_rejects_exec() {
        let dir = TempDir::new().unwrap();
        let runtime = LocalRuntime::new(dir.path(), "/workspace");
        let id = runtime.create_container(&spec("c1")).await.unwrap();
        runtime.stop_container(&id, 0).await.unwrap();

        let status = runtime.inspect_container(&id).await.unwrap();
        assert_eq!(status.state, ContainerState::Exited);
        assert!(runtime
            .exec(&id, &argv(&["true"]), "/workspace")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_duplicate_name_and_missing_ids() {
        let dir = TempDir::new().unwrap();
        let runtime = LocalRuntime::new(dir.path(), "/workspace");
        runtime.create_container(&spec("c1")).await.unwrap();

        let err = runtime.create_container(&spec("c1")).await.unwrap_err();
        assert!(matches!(err, SandboxError::AlreadyExists { .. }));

        assert!(runtime
            .remove_container("nope")
            .await
            .unwrap_err()
            .is_container_not_found());
        assert!(runtime
            .remove_volume("nope")
            .await
            .unwrap_err()
            .is_volume_not_found());
    }

    #[tokio::test]
    async fn test_containers_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let id = {
            let runtime = LocalRuntime::new(dir.path(), "/workspace");
            let id = runtime.create_container(&spec("c1")).await.unwrap();
            runtime.stop_container(&id, 0).await.unwrap();
            id
        };

        let reopened = LocalRuntime::new(dir.path(), "/workspace");
        let status = reopened.inspect_container(&id).await.unwrap();
        assert_eq!(status.state, ContainerState::Exited);
        assert_eq!(status.name.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_missing_program_exits_127() {
        let dir = TempDir::new().unwrap();
        let runtime = LocalRuntime::new(dir.path(), "/workspace");
        let id = runtime.create_container(&spec("c1")).await.unwrap();

        let result = runtime
            .exec(&id, &argv(&["definitely-not-a-real-binary-xyz"]), "/workspace")
            .await
            .unwrap();
        assert_eq!(result.exit_code, 127);
    }
}
