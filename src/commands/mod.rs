//! CLI command implementations.
//!
//! Each submodule keeps formatting pure and does IO only in its `run`
//! functions. Sandboxes are looked up by project in the store under
//! `.workcell/` in the working directory.

pub mod chat;
pub mod files;
pub mod git;
pub mod sandbox;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use workcell::config::Config;
use workcell::files::FileMediator;
use workcell::sandbox::SandboxManager;

use crate::state::SandboxStore;

/// Configuration, engine connection and working directory shared by commands.
pub(crate) struct Workbench {
    pub config: Config,
    pub cwd: PathBuf,
    pub manager: Arc<SandboxManager>,
}

impl Workbench {
    pub async fn open(config_path: &Path) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let config = Config::load_file(&cwd.join(config_path))?;
        let manager = SandboxManager::connect(&config)
            .await
            .context("Failed to connect to the container engine")?;
        Ok(Self {
            config,
            cwd,
            manager: Arc::new(manager),
        })
    }

    pub fn store(&self) -> Result<SandboxStore> {
        SandboxStore::load(&self.cwd)
    }

    pub fn save(&self, store: &SandboxStore) -> Result<()> {
        store.save(&self.cwd)
    }

    /// Container id of `project`'s sandbox.
    pub fn container_id(&self, project: &str) -> Result<String> {
        self.store()?.container_id(project)
    }

    pub fn mediator(&self) -> FileMediator {
        FileMediator::new(
            Arc::clone(&self.manager),
            self.config.files.clone(),
            self.config.git.clone(),
        )
    }
}
