//! Events emitted while the agent processes one message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One step of an agent turn, serialized as a flat record tagged by `type`:
///
/// ```json
/// {"type": "tool_call", "tool": "create_file", "args": {"path": "main.py"}}
/// {"type": "file_created", "file": "main.py"}
/// {"type": "done", "files_modified": ["main.py"]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Final answer from the model.
    Text { content: String },
    /// A tool the model asked to run.
    ToolCall { tool: String, args: Value },
    /// Tool output, truncated for transport.
    ToolResult {
        tool: String,
        content: String,
        success: bool,
    },
    /// `create_file` wrote a new file.
    FileCreated { file: String },
    /// Any other tool changed a file.
    FileModified { file: String },
    /// Shell output from `run_command`, truncated for transport.
    CommandOutput { content: String },
    /// The turn failed or hit the iteration ceiling.
    Error { content: String },
    /// Always the last event of a turn.
    Done { files_modified: Vec<String> },
}

impl ChatEvent {
    /// True for the closing [`ChatEvent::Done`].
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}
