//! One agent turn against a project's sandbox.
//!
//! Events are printed to stdout as JSON lines, one per event, in order.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use workcell::agent::{AgentLoop, ChatEvent, ProjectContext};
use workcell::backend::{build_backend, Message};
use workcell::tools::ToolRegistry;

use super::Workbench;

pub(crate) async fn run(
    bench: &Workbench,
    project: ProjectContext,
    message: &str,
    history: Option<&Path>,
) -> Result<()> {
    let history = match history {
        Some(path) => load_history(path)?,
        None => Vec::new(),
    };
    let container_id = bench.container_id(&project.name)?;

    let backend = build_backend(&bench.config.backend)?;
    let registry = ToolRegistry::new(
        Arc::new(bench.mediator()),
        Arc::clone(&bench.manager),
        Duration::from_secs(bench.config.agent.command_timeout_secs),
    );
    let agent = AgentLoop::new(Arc::new(registry), backend, bench.config.agent.clone());

    let events = agent
        .process_message(&container_id, &history, message, &project)
        .await;
    for event in &events {
        println!("{}", serde_json::to_string(event)?);
    }

    if events
        .iter()
        .any(|e| matches!(e, ChatEvent::Error { .. }))
    {
        anyhow::bail!("Agent turn ended with an error");
    }
    Ok(())
}

/// Read a JSON array of `{role, content, ...}` messages.
fn load_history(path: &Path) -> Result<Vec<Message>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read history file: {}", path.display()))?;
    parse_history(&content)
        .with_context(|| format!("Failed to parse history file: {}", path.display()))
}

fn parse_history(content: &str) -> Result<Vec<Message>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(content)?)
}
