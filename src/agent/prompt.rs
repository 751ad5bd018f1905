//! System prompt construction.

use serde::{Deserialize, Serialize};

/// The project a sandbox belongs to, as described to the model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    /// Project name shown to the model.
    pub name: String,
    /// What the project is about, if known.
    #[serde(default)]
    pub description: Option<String>,
    /// Free-form kind such as "api" or "web".
    #[serde(default)]
    pub project_type: Option<String>,
}

impl ProjectContext {
    /// Context with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

const CAPABILITIES: &str = "\
You are an expert software engineer working inside a project sandbox.

You can create, read, edit and delete files, run shell commands, search the codebase \
and manage git, all inside an isolated container.

## Capabilities
- Create projects from scratch: scaffold the complete structure with every file it needs
- Edit existing code: read files for context, then make targeted edits
- Install dependencies with pip, npm or other package managers via run_command
- Run tests and any other shell command inside the sandbox
- Commit changes and check git status

## Guidelines
1. Read a file before editing it.
2. Write complete files. Never leave placeholders or \"...\".
3. After making changes, briefly explain what you did.
4. If a tool call fails, fix the problem or explain what went wrong.
5. Write clean, production-quality code.
6. Act first, then explain. Keep commentary before tool calls short.
7. Give new projects a proper structure: README, dependency manifest, .gitignore.

## Environment
- Files persist across messages
- Always use the tools; don't just describe what to do
";

/// Capability description followed by the project context lines.
pub fn system_prompt(workspace_root: &str, project: &ProjectContext) -> String {
    let mut prompt = String::from(CAPABILITIES);
    prompt.push_str(&format!("- You are working inside {workspace_root}\n"));
    prompt.push_str(&format!("\n## Current project: {}", project.name));
    if let Some(description) = project.description.as_deref().filter(|d| !d.is_empty()) {
        prompt.push_str(&format!("\nDescription: {description}"));
    }
    if let Some(kind) = project.project_type.as_deref().filter(|t| !t.is_empty()) {
        prompt.push_str(&format!("\nProject type: {kind}"));
    }
    prompt
}
