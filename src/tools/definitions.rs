//! The fixed tool catalog offered to the completion backend.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Schema of one tool as handed to the completion backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name the model calls.
    pub name: String,
    /// What the tool does, for the model.
    pub description: String,
    /// JSON Schema object describing the arguments.
    pub parameters: Value,
}

/// Every tool the agent can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    /// Read a file.
    ReadFile,
    /// Create or overwrite a file.
    CreateFile,
    /// Replace the first occurrence of a string in a file.
    EditFile,
    /// Delete a file or directory.
    DeleteFile,
    /// List a directory.
    ListDirectory,
    /// Regex search over file contents.
    SearchCodebase,
    /// Run a shell command.
    RunCommand,
    /// Create a directory.
    CreateDirectory,
    /// Commit and push all changes.
    GitCommit,
    /// Show git status.
    GitStatus,
}

impl ToolName {
    /// Every tool, in catalog order.
    pub const ALL: [Self; 10] = [
        Self::ReadFile,
        Self::CreateFile,
        Self::EditFile,
        Self::DeleteFile,
        Self::ListDirectory,
        Self::SearchCodebase,
        Self::RunCommand,
        Self::CreateDirectory,
        Self::GitCommit,
        Self::GitStatus,
    ];

    /// Wire name of the tool.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadFile => "read_file",
            Self::CreateFile => "create_file",
            Self::EditFile => "edit_file",
            Self::DeleteFile => "delete_file",
            Self::ListDirectory => "list_directory",
            Self::SearchCodebase => "search_codebase",
            Self::RunCommand => "run_command",
            Self::CreateDirectory => "create_directory",
            Self::GitCommit => "git_commit",
            Self::GitStatus => "git_status",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::ReadFile => {
                "Read the contents of a file in the project. Returns file content, size, and line count."
            }
            Self::CreateFile => {
                "Create a new file or overwrite an existing file with the given content. \
                 Parent directories are created automatically."
            }
            Self::EditFile => {
                "Edit a file by replacing a specific string with new content. \
                 Use read_file first to see the current content, then use this to make targeted edits. \
                 old_string must match exactly (including whitespace and indentation). \
                 Only the first occurrence is replaced."
            }
            Self::DeleteFile => "Delete a file or directory from the project.",
            Self::ListDirectory => {
                "List files and directories at a path. Shows file names, sizes, and types."
            }
            Self::SearchCodebase => {
                "Search for a text pattern across the entire codebase. \
                 Returns matching file paths, line numbers, and content."
            }
            Self::RunCommand => {
                "Run a shell command inside the project sandbox. \
                 Use for: installing dependencies (pip install, npm install), \
                 running tests (pytest, npm test), linting, building, etc. \
                 Commands run in the workspace root."
            }
            Self::CreateDirectory => {
                "Create a directory (and any parent directories). \
                 Use before creating files in new directories."
            }
            Self::GitCommit => "Stage all changes and create a git commit with the given message.",
            Self::GitStatus => {
                "Get the current git status showing modified, staged, and untracked files."
            }
        }
    }

    fn parameters(self) -> Value {
        let path = |description: &str| json!({ "type": "string", "description": description });

        match self {
            Self::ReadFile => json!({
                "type": "object",
                "properties": {
                    "path": path("File path relative to workspace root, e.g. 'src/main.py'"),
                },
                "required": ["path"],
            }),
            Self::CreateFile => json!({
                "type": "object",
                "properties": {
                    "path": path("File path relative to workspace root"),
                    "content": { "type": "string", "description": "The full file content to write" },
                },
                "required": ["path", "content"],
            }),
            Self::EditFile => json!({
                "type": "object",
                "properties": {
                    "path": path("File path relative to workspace root"),
                    "old_string": { "type": "string", "description": "The exact string to find and replace" },
                    "new_string": { "type": "string", "description": "The replacement string" },
                },
                "required": ["path", "old_string", "new_string"],
            }),
            Self::DeleteFile => json!({
                "type": "object",
                "properties": {
                    "path": path("File path relative to workspace root"),
                },
                "required": ["path"],
            }),
            Self::ListDirectory => json!({
                "type": "object",
                "properties": {
                    "path": path("Directory path relative to workspace root. Use '.' for root."),
                    "recursive": {
                        "type": "boolean",
                        "description": "If true, list all files recursively. Default false.",
                    },
                },
                "required": ["path"],
            }),
            Self::SearchCodebase => json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search pattern (extended regex)" },
                    "glob": {
                        "type": "string",
                        "description": "Optional file filter, e.g. '*.py' to only search Python files",
                    },
                },
                "required": ["query"],
            }),
            Self::RunCommand => json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "Shell command to execute, e.g. 'pip install fastapi'",
                    },
                },
                "required": ["command"],
            }),
            Self::CreateDirectory => json!({
                "type": "object",
                "properties": {
                    "path": path("Directory path relative to workspace root, e.g. 'src/models'"),
                },
                "required": ["path"],
            }),
            Self::GitCommit => json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string", "description": "Commit message describing the changes" },
                },
                "required": ["message"],
            }),
            Self::GitStatus => json!({
                "type": "object",
                "properties": {},
            }),
        }
    }

    /// Schema handed to the backend.
    pub fn definition(self) -> ToolDefinition {
        ToolDefinition {
            name: self.as_str().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ToolName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// The full catalog, in a stable order.
pub fn catalog() -> Vec<ToolDefinition> {
    ToolName::ALL.into_iter().map(ToolName::definition).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for tool in ToolName::ALL {
            assert_eq!(tool.as_str().parse::<ToolName>().unwrap(), tool);
        }
        assert!("rm_rf".parse::<ToolName>().is_err());
        assert!("Read_File".parse::<ToolName>().is_err());
    }

    #[test]
    fn test_catalog_is_well_formed() {
        let tools = catalog();
        assert_eq!(tools.len(), 10);
        for tool in &tools {
            assert_eq!(tool.parameters["type"], "object", "{}", tool.name);
            assert!(!tool.description.is_empty());
            if let Some(required) = tool.parameters["required"].as_array() {
                for field in required {
                    let field = field.as_str().unwrap();
                    assert!(
                        tool.parameters["properties"].get(field).is_some(),
                        "{} requires undeclared {field}",
                        tool.name
                    );
                }
            }
        }
    }
}
