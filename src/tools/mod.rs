//! Tool registry and dispatch.
//!
//! Maps a backend's tool call onto exactly one executor. Every failure below
//! this layer comes back as a failed [`ToolResult`] whose output explains what
//! went wrong, so the agent can narrate it to the model instead of aborting.

mod definitions;

pub use definitions::{catalog, ToolDefinition, ToolName};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::files::{FileError, FileMediator, GitStatus};
use crate::sandbox::{SandboxError, SandboxManager};

/// A backend's request to run one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id echoed back with the result.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Arguments as a JSON object.
    pub arguments: Value,
}

/// Outcome of one tool call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// False when the tool failed.
    pub success: bool,
    /// Text handed back to the model.
    pub output: String,
    /// Files the call wrote or deleted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_modified: Vec<String>,
}

impl ToolResult {
    /// Successful result.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            files_modified: Vec::new(),
        }
    }

    /// Successful result that touched `path`.
    pub fn ok_with_file(output: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            files_modified: vec![path.into()],
        }
    }

    /// Failed result.
    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            files_modified: Vec::new(),
        }
    }
}

/// Why a tool call could not be carried out.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// `edit_file` could not find the text to replace.
    #[error(
        "edit_file failed: old_string not found in {path}. Use read_file to check the current content."
    )]
    EditTargetNotFound { path: String },

    /// No tool has this name.
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    /// Arguments are missing or have the wrong type.
    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: ToolName, message: String },

    /// File or git operation failed.
    #[error(transparent)]
    File(#[from] FileError),

    /// Engine failure.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

impl ToolError {
    /// Failures the model can act on directly, reported without an `Error:` prefix.
    fn is_guidance(&self) -> bool {
        matches!(
            self,
            Self::EditTargetNotFound { .. } | Self::UnknownTool { .. }
        )
    }
}

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Deserialize)]
struct CreateFileArgs {
    path: String,
    content: String,
}

#[derive(Deserialize)]
struct EditFileArgs {
    path: String,
    old_string: String,
    new_string: String,
}

#[derive(Deserialize)]
struct ListArgs {
    #[serde(default = "default_list_path")]
    path: String,
    #[serde(default)]
    recursive: bool,
}

fn default_list_path() -> String {
    ".".to_string()
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    glob: Option<String>,
}

#[derive(Deserialize)]
struct CommandArgs {
    command: String,
}

#[derive(Deserialize)]
struct CommitArgs {
    message: String,
}

fn parse_args<T: DeserializeOwned>(tool: ToolName, arguments: &Value) -> Result<T, ToolError> {
    let arguments = if arguments.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        arguments.clone()
    };
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments {
        tool,
        message: e.to_string(),
    })
}

/// Runs tool calls against one sandbox's files, git, and shell.
pub struct ToolRegistry {
    files: Arc<FileMediator>,
    sandbox: Arc<SandboxManager>,
    command_timeout: Duration,
    definitions: Vec<ToolDefinition>,
}

impl ToolRegistry {
    /// Registry running tools through `files` and `sandbox`.
    pub fn new(
        files: Arc<FileMediator>,
        sandbox: Arc<SandboxManager>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            files,
            sandbox,
            command_timeout,
            definitions: catalog(),
        }
    }

    /// The tool catalog, built once.
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Working directory of every tool, inside the sandbox.
    pub fn workspace_root(&self) -> &str {
        self.sandbox.workspace_root()
    }

    /// Run one call. Never fails: problems become a failed result.
    pub async fn execute(&self, container_id: &str, call: &ToolCall) -> ToolResult {
        let outcome = match call.name.parse::<ToolName>() {
            Ok(tool) => self.dispatch(tool, container_id, &call.arguments).await,
            Err(name) => Err(ToolError::UnknownTool { name }),
        };

        match outcome {
            Ok(result) => {
                debug!("{} -> success={}", call.name, result.success);
                result
            }
            Err(e) if e.is_guidance() => ToolResult::failed(e.to_string()),
            Err(e) => {
                error!(
                    "Tool execution failed: {}({}) -> {}",
                    call.name, call.arguments, e
                );
                ToolResult::failed(format!("Error: {e}"))
            }
        }
    }

    async fn dispatch(
        &self,
        tool: ToolName,
        container_id: &str,
        arguments: &Value,
    ) -> Result<ToolResult, ToolError> {
        let files = &self.files;
        match tool {
            ToolName::ReadFile => {
                let args: PathArgs = parse_args(tool, arguments)?;
                let file = files.read_file(container_id, &args.path).await?;
                Ok(ToolResult::ok(format!(
                    "File: {} ({} lines, {} bytes)\n\n{}",
                    file.path, file.lines, file.size, file.content
                )))
            }
            ToolName::CreateFile => {
                let args: CreateFileArgs = parse_args(tool, arguments)?;
                let path = files.resolve(&args.path)?.relative();
                files.write_file(container_id, &path, &args.content).await?;
                Ok(ToolResult::ok_with_file(format!("File created: {path}"), path))
            }
            ToolName::EditFile => {
                let args: EditFileArgs = parse_args(tool, arguments)?;
                let path = files.resolve(&args.path)?.relative();
                let current = files.read_file(container_id, &path).await?;
                if args.old_string.is_empty() || !current.content.contains(&args.old_string) {
                    return Err(ToolError::EditTargetNotFound { path });
                }
                let updated = current.content.replacen(&args.old_string, &args.new_string, 1);
                files.write_file(container_id, &path, &updated).await?;
                Ok(ToolResult::ok_with_file(format!("File edited: {path}"), path))
            }
            ToolName::DeleteFile => {
                let args: PathArgs = parse_args(tool, arguments)?;
                let path = files.resolve(&args.path)?.relative();
                files.delete_file(container_id, &path).await?;
                Ok(ToolResult::ok_with_file(format!("Deleted: {path}"), path))
            }
            ToolName::ListDirectory => {
                let args: ListArgs = parse_args(tool, arguments)?;
                let entries = files
                    .list_files(container_id, &args.path, args.recursive)
                    .await?;
                if entries.is_empty() {
                    return Ok(ToolResult::ok("Directory is empty."));
                }
                let lines: Vec<String> = entries
                    .iter()
                    .map(|e| match (e.is_directory, e.size) {
                        (true, _) => format!("[dir]  {}/", e.path),
                        (false, Some(size)) => format!("[file] {} ({size} bytes)", e.path),
                        (false, None) => format!("[file] {}", e.path),
                    })
                    .collect();
                Ok(ToolResult::ok(lines.join("\n")))
            }
            ToolName::SearchCodebase => {
                let args: SearchArgs = parse_args(tool, arguments)?;
                let matches = files
                    .search_files(container_id, &args.query, args.glob.as_deref())
                    .await?;
                if matches.is_empty() {
                    return Ok(ToolResult::ok(format!(
                        "No matches found for '{}'",
                        args.query
                    )));
                }
                let mut lines = vec![format!("Found {} matches:\n", matches.len())];
                lines.extend(
                    matches
                        .iter()
                        .map(|m| format!("  {}:{}  {}", m.path, m.line_number, m.content)),
                );
                Ok(ToolResult::ok(lines.join("\n")))
            }
            ToolName::RunCommand => {
                let args: CommandArgs = parse_args(tool, arguments)?;
                let argv = ["bash".to_string(), "-c".to_string(), args.command];
                let result = self
                    .sandbox
                    .exec_command(container_id, &argv, self.command_timeout, None)
                    .await?;
                Ok(ToolResult {
                    success: result.success(),
                    output: format_command_output(result.exit_code, &result.stdout, &result.stderr),
                    files_modified: Vec::new(),
                })
            }
            ToolName::CreateDirectory => {
                let args: PathArgs = parse_args(tool, arguments)?;
                let path = files.resolve(&args.path)?.relative();
                files.create_directory(container_id, &path).await?;
                Ok(ToolResult::ok(format!("Directory created: {path}")))
            }
            ToolName::GitCommit => {
                let args: CommitArgs = parse_args(tool, arguments)?;
                let sha = files.commit_and_push(container_id, &args.message).await?;
                let short = sha.get(..12).unwrap_or(&sha);
                Ok(ToolResult::ok(format!("Committed: {short} - {}", args.message)))
            }
            ToolName::GitStatus => {
                let status = files.git_status(container_id).await?;
                Ok(ToolResult::ok(format_git_status(&status)))
            }
        }
    }
}

fn format_command_output(exit_code: i64, stdout: &str, stderr: &str) -> String {
    let mut parts = Vec::new();
    if !stdout.is_empty() {
        parts.push(stdout.to_string());
    }
    if !stderr.is_empty() {
        parts.push(format!("STDERR:\n{stderr}"));
    }
    let body = if parts.is_empty() {
        "(no output)".to_string()
    } else {
        parts.join("\n")
    };
    format!("Exit code: {exit_code}\n{body}")
}

fn format_git_status(status: &GitStatus) -> String {
    let mut lines = vec![format!("Branch: {}", status.branch)];
    for (label, paths) in [
        ("Staged", &status.staged),
        ("Modified", &status.modified),
        ("Untracked", &status.untracked),
    ] {
        if !paths.is_empty() {
            lines.push(format!("{label}: {}", paths.join(", ")));
        }
    }
    if !status.has_changes {
        lines.push("Working tree clean, no changes.".to_string());
    }
    lines.join("\n")
}
