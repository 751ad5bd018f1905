//! Sandboxes created from this working directory, keyed by project.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use workcell::sandbox::Sandbox;

const STATE_FILE: &str = ".workcell/sandboxes.toml";

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct SandboxStore {
    #[serde(default)]
    pub sandboxes: BTreeMap<String, Sandbox>,
}

impl SandboxStore {
    /// Load the store, or an empty one if none was saved yet.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let state_path = project_dir.join(STATE_FILE);

        if !state_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&state_path)
            .with_context(|| format!("Failed to read state file: {}", state_path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", state_path.display()))
    }

    pub fn save(&self, project_dir: &Path) -> Result<()> {
        let state_path = project_dir.join(STATE_FILE);

        if let Some(parent) = state_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize state")?;

        fs::write(&state_path, content)
            .with_context(|| format!("Failed to write state file: {}", state_path.display()))?;

        Ok(())
    }

    pub fn get(&self, project_id: &str) -> Result<&Sandbox> {
        self.sandboxes
            .get(project_id)
            .with_context(|| missing(project_id))
    }

    pub fn get_mut(&mut self, project_id: &str) -> Result<&mut Sandbox> {
        self.sandboxes
            .get_mut(project_id)
            .with_context(|| missing(project_id))
    }

    /// Container id of a project's sandbox.
    pub fn container_id(&self, project_id: &str) -> Result<String> {
        self.get(project_id)?
            .container_id
            .clone()
            .with_context(|| format!("Sandbox for '{project_id}' has no container"))
    }

    pub fn insert(&mut self, sandbox: Sandbox) {
        self.sandboxes.insert(sandbox.project_id.clone(), sandbox);
    }

    pub fn remove(&mut self, project_id: &str) -> Option<Sandbox> {
        self.sandboxes.remove(project_id)
    }
}

fn missing(project_id: &str) -> String {
    format!("No sandbox for project '{project_id}'. Run `workcell create --project {project_id}` first.")
}
