//! The reason-act loop.
//!
//! Each call to [`AgentLoop::process_message`] is independent: the caller
//! supplies the conversation history and the sandbox, and gets back the
//! ordered events of one turn. The loop:
//! 1. sends the conversation and the tool catalog to the completion backend
//! 2. runs any requested tools, one at a time, and feeds the results back
//! 3. stops on a plain-text answer or at the iteration ceiling

mod events;
mod prompt;

pub use events::ChatEvent;
pub use prompt::{system_prompt, ProjectContext};

/// Hard ceiling on completion calls per turn, whatever the configuration says.
pub const MAX_ITERATIONS: u32 = 15;

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::backend::{CompletionBackend, CompletionRequest, Message};
use crate::config::AgentConfig;
use crate::tools::{ToolCall, ToolName, ToolRegistry};

/// Drives one sandbox's tools from a completion backend.
pub struct AgentLoop {
    registry: Arc<ToolRegistry>,
    backend: Arc<dyn CompletionBackend>,
    config: AgentConfig,
}

/// Files touched during one turn, in first-touched order.
#[derive(Default)]
struct TouchedFiles(Vec<String>);

impl TouchedFiles {
    fn insert(&mut self, path: &str) {
        if !self.0.iter().any(|p| p == path) {
            self.0.push(path.to_string());
        }
    }
}

impl AgentLoop {
    /// Build a loop over `registry`'s tools, answering through `backend`.
    pub fn new(
        registry: Arc<ToolRegistry>,
        backend: Arc<dyn CompletionBackend>,
        config: AgentConfig,
    ) -> Self {
        Self {
            registry,
            backend,
            config,
        }
    }

    /// Process one user message against the sandbox `container_id`.
    ///
    /// The returned events always end with exactly one [`ChatEvent::Done`].
    /// Backend failures and the iteration ceiling are reported as a single
    /// [`ChatEvent::Error`] before it.
    pub async fn process_message(
        &self,
        container_id: &str,
        history: &[Message],
        user_message: &str,
        project: &ProjectContext,
    ) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        let mut touched = TouchedFiles::default();

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system_prompt(
            self.registry.workspace_root(),
            project,
        )));
        messages.extend_from_slice(history);
        messages.push(Message::user(user_message));

        info!(
            "Processing message for project '{}': {}",
            project.name,
            truncate_chars(user_message, 100)
        );

        let max_iterations = self.config.max_iterations.min(MAX_ITERATIONS);
        let mut finished = false;

        for iteration in 1..=max_iterations {
            debug!("Agent iteration {}/{}", iteration, max_iterations);

            let request = CompletionRequest {
                messages: &messages,
                tools: self.registry.definitions(),
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
            };
            let response = match self.backend.complete(&request).await {
                Ok(response) => response,
                Err(e) => {
                    error!("{} completion failed: {:#}", self.backend.name(), e);
                    events.push(ChatEvent::Error {
                        content: format!("Completion backend failed: {e:#}"),
                    });
                    finished = true;
                    break;
                }
            };
            debug!(
                "{} responded in {}ms (finish_reason={}, tools={})",
                response.model,
                response.latency.as_millis(),
                response.finish_reason,
                response.tool_calls.len()
            );

            if response.tool_calls.is_empty() {
                if !response.content.is_empty() {
                    events.push(ChatEvent::Text {
                        content: response.content,
                    });
                }
                finished = true;
                break;
            }

            let mut results = Vec::with_capacity(response.tool_calls.len());
            for call in &response.tool_calls {
                let output = self
                    .run_tool(container_id, call, &mut events, &mut touched)
                    .await;
                results.push(Message::tool(call, output));
            }
            messages.push(Message::assistant_with_tools(
                response.content,
                response.tool_calls,
            ));
            messages.extend(results);
        }

        if !finished {
            warn!(
                "Agent hit max iterations ({}) for project '{}'",
                max_iterations, project.name
            );
            events.push(ChatEvent::Error {
                content: format!(
                    "Reached the maximum number of steps ({max_iterations}). \
                     The changes so far are kept; ask to continue if more is needed."
                ),
            });
        }

        events.push(ChatEvent::Done {
            files_modified: touched.0,
        });
        info!("Agent finished: {} events", events.len());
        events
    }

    /// Run one call, emit its events, and return the full output for the model.
    async fn run_tool(
        &self,
        container_id: &str,
        call: &ToolCall,
        events: &mut Vec<ChatEvent>,
        touched: &mut TouchedFiles,
    ) -> String {
        info!(
            "Tool call: {}({})",
            call.name,
            truncate_chars(&call.arguments.to_string(), 200)
        );
        events.push(ChatEvent::ToolCall {
            tool: call.name.clone(),
            args: call.arguments.clone(),
        });

        let result = self.registry.execute(container_id, call).await;

        events.push(ChatEvent::ToolResult {
            tool: call.name.clone(),
            content: truncate_chars(&result.output, self.config.tool_result_preview),
            success: result.success,
        });

        let created = call.name == ToolName::CreateFile.as_str();
        for file in &result.files_modified {
            events.push(if created {
                ChatEvent::FileCreated { file: file.clone() }
            } else {
                ChatEvent::FileModified { file: file.clone() }
            });
            touched.insert(file);
        }

        if call.name == ToolName::RunCommand.as_str() {
            events.push(ChatEvent::CommandOutput {
                content: truncate_chars(&result.output, self.config.command_output_preview),
            });
        }

        result.output
    }
}

/// The first `max` characters of `s`.
fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((end, _)) => s[..end].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockBackend, MockReply};
    use crate::backend::Role;
    use crate::tools::tests::{blank_registry, local_registry};
    use serde_json::json;
    use tempfile::TempDir;

    async fn agent_with(
        dir: &TempDir,
        project: &str,
        replies: Vec<MockReply>,
    ) -> (AgentLoop, MockBackend, Arc<ToolRegistry>, String) {
        agent_with_config(dir, project, replies, AgentConfig::default()).await
    }

    async fn agent_with_config(
        dir: &TempDir,
        project: &str,
        replies: Vec<MockReply>,
        config: AgentConfig,
    ) -> (AgentLoop, MockBackend, Arc<ToolRegistry>, String) {
        let (registry, id) = local_registry(dir, project).await;
        let registry = Arc::new(registry);
        let backend = MockBackend::new(replies);
        let agent = AgentLoop::new(Arc::clone(&registry), Arc::new(backend.clone()), config);
        (agent, backend, registry, id)
    }

    fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 2), "he");
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("日本語", 1), "日");
        assert_eq!(truncate_chars("", 0), "");
    }

    #[test]
    fn test_touched_files_dedup_keeps_order() {
        let mut touched = TouchedFiles::default();
        touched.insert("b.py");
        touched.insert("a.py");
        touched.insert("b.py");
        assert_eq!(touched.0, ["b.py", "a.py"]);
    }

    #[tokio::test]
    async fn test_create_file_in_blank_sandbox() {
        let dir = TempDir::new().unwrap();
        let (registry, files, id) = blank_registry(&dir, "a-create").await;
        let backend = MockBackend::new(vec![
            MockReply::tool(
                "call_1",
                "create_file",
                json!({"path": "app.py", "content": "print('hi')"}),
            ),
            MockReply::text("Created app.py."),
        ]);
        let agent = AgentLoop::new(
            Arc::new(registry),
            Arc::new(backend.clone()),
            AgentConfig::default(),
        );

        let events = agent
            .process_message(&id, &[], "Create app.py", &ProjectContext::named("demo"))
            .await;

        assert_eq!(
            events,
            vec![
                ChatEvent::ToolCall {
                    tool: "create_file".to_string(),
                    args: json!({"path": "app.py", "content": "print('hi')"}),
                },
                ChatEvent::ToolResult {
                    tool: "create_file".to_string(),
                    content: "File created: app.py".to_string(),
                    success: true,
                },
                ChatEvent::FileCreated {
                    file: "app.py".to_string()
                },
                ChatEvent::Text {
                    content: "Created app.py.".to_string()
                },
                ChatEvent::Done {
                    files_modified: vec!["app.py".to_string()]
                },
            ]
        );
        assert_eq!(backend.invocation_count(), 2);

        let file = files.read_file(&id, "app.py").await.unwrap();
        assert_eq!(file.content, "print('hi')");

        // Second request saw: system, user, assistant with the call, tool result
        let sent = backend.last_request();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0].role, Role::System);
        assert!(sent[0].content.contains("## Current project: demo"));
        assert_eq!(sent[1], Message::user("Create app.py"));
        assert_eq!(sent[2].tool_calls.len(), 1);
        assert_eq!(sent[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn test_iteration_ceiling() {
        let dir = TempDir::new().unwrap();
        let (agent, backend, _registry, id) = agent_with(
            &dir,
            "a-ceiling",
            vec![MockReply::tool("loop", "list_directory", json!({"path": "."}))],
        )
        .await;

        let events = agent
            .process_message(&id, &[], "Keep going", &ProjectContext::named("demo"))
            .await;

        assert_eq!(backend.invocation_count(), 15);
        assert_eq!(events.iter().filter(|e| e.is_done()).count(), 1);
        assert!(events.last().unwrap().is_done());
        let errors: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ChatEvent::Error { .. }))
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            events[events.len() - 2],
            ChatEvent::Error { ref content } if content.contains("maximum number of steps (15)")
        ));
    }

    #[tokio::test]
    async fn test_configured_iterations_cannot_exceed_ceiling() {
        let dir = TempDir::new().unwrap();
        let config = AgentConfig {
            max_iterations: 40,
            ..AgentConfig::default()
        };
        let (agent, backend, _registry, id) = agent_with_config(
            &dir,
            "a-raised",
            vec![MockReply::tool("loop", "list_directory", json!({"path": "."}))],
            config,
        )
        .await;

        let events = agent
            .process_message(&id, &[], "Keep going", &ProjectContext::named("demo"))
            .await;

        assert_eq!(backend.invocation_count(), 15);
        assert!(matches!(
            events[events.len() - 2],
            ChatEvent::Error { ref content } if content.contains("maximum number of steps (15)")
        ));
    }

    #[tokio::test]
    async fn test_lower_iteration_setting_is_honored() {
        let dir = TempDir::new().unwrap();
        let config = AgentConfig {
            max_iterations: 3,
            ..AgentConfig::default()
        };
        let (agent, backend, _registry, id) = agent_with_config(
            &dir,
            "a-lowered",
            vec![MockReply::tool("loop", "list_directory", json!({"path": "."}))],
            config,
        )
        .await;

        agent
            .process_message(&id, &[], "Keep going", &ProjectContext::named("demo"))
            .await;
        assert_eq!(backend.invocation_count(), 3);
    }

    #[tokio::test]
    async fn test_backend_failure_ends_turn() {
        let dir = TempDir::new().unwrap();
        let (agent, backend, _registry, id) = agent_with(
            &dir,
            "a-fail",
            vec![MockReply::Error("503 from upstream".to_string())],
        )
        .await;

        let events = agent
            .process_message(&id, &[], "Hello", &ProjectContext::named("demo"))
            .await;

        assert_eq!(backend.invocation_count(), 1);
        assert_eq!(events.len(), 2);
        assert!(
            matches!(&events[0], ChatEvent::Error { content } if content.contains("503 from upstream"))
        );
        assert_eq!(
            events[1],
            ChatEvent::Done {
                files_modified: Vec::new()
            }
        );
    }

    #[tokio::test]
    async fn test_results_are_keyed_by_call_id() {
        let dir = TempDir::new().unwrap();
        let (agent, backend, registry, id) = agent_with(
            &dir,
            "a-keyed",
            vec![
                MockReply::Tools(vec![
                    ("first".to_string(), "read_file".to_string(), json!({"path": "one.txt"})),
                    ("second".to_string(), "read_file".to_string(), json!({"path": "two.txt"})),
                ]),
                MockReply::text("Read both."),
            ],
        )
        .await;
        for (path, content) in [("one.txt", "alpha"), ("two.txt", "beta")] {
            let created = registry
                .execute(
                    &id,
                    &tool_call("setup", "create_file", json!({"path": path, "content": content})),
                )
                .await;
            assert!(created.success);
        }

        let history = vec![Message::user("earlier"), Message::assistant("noted")];
        agent
            .process_message(&id, &history, "Read both files", &ProjectContext::named("demo"))
            .await;

        let sent = backend.last_request();
        // system, two history turns, user, assistant, two tool results
        assert_eq!(sent.len(), 7);
        assert_eq!(sent[1], Message::user("earlier"));
        assert_eq!(sent[5].tool_call_id.as_deref(), Some("first"));
        assert!(sent[5].content.ends_with("alpha"));
        assert_eq!(sent[6].tool_call_id.as_deref(), Some("second"));
        assert!(sent[6].content.ends_with("beta"));
    }

    #[tokio::test]
    async fn test_run_command_and_edit_events() {
        let dir = TempDir::new().unwrap();
        let (agent, _backend, _registry, id) = agent_with(
            &dir,
            "a-cmd",
            vec![
                MockReply::Tools(vec![
                    (
                        "c1".to_string(),
                        "create_file".to_string(),
                        json!({"path": "main.py", "content": "x = 1\n"}),
                    ),
                    (
                        "c2".to_string(),
                        "edit_file".to_string(),
                        json!({"path": "main.py", "old_string": "x = 1", "new_string": "x = 2"}),
                    ),
                    (
                        "c3".to_string(),
                        "run_command".to_string(),
                        json!({"command": "cat main.py"}),
                    ),
                ]),
                MockReply::text("All done."),
            ],
        )
        .await;

        let events = agent
            .process_message(&id, &[], "Set x to 2", &ProjectContext::named("demo"))
            .await;

        assert!(events.contains(&ChatEvent::FileCreated {
            file: "main.py".to_string()
        }));
        assert!(events.contains(&ChatEvent::FileModified {
            file: "main.py".to_string()
        }));
        assert!(events.iter().any(
            |e| matches!(e, ChatEvent::CommandOutput { content } if content.contains("x = 2"))
        ));
        assert_eq!(
            events.last(),
            Some(&ChatEvent::Done {
                files_modified: vec!["main.py".to_string()]
            })
        );
    }

    #[tokio::test]
    async fn test_tool_result_preview_is_truncated() {
        let dir = TempDir::new().unwrap();
        let (agent, backend, registry, id) = agent_with(
            &dir,
            "a-preview",
            vec![
                MockReply::tool("r", "read_file", json!({"path": "long.txt"})),
                MockReply::text("ok"),
            ],
        )
        .await;
        let long = "é".repeat(1000);
        registry
            .execute(
                &id,
                &tool_call("setup", "create_file", json!({"path": "long.txt", "content": long})),
            )
            .await;

        let events = agent
            .process_message(&id, &[], "Read it", &ProjectContext::named("demo"))
            .await;

        let preview = events
            .iter()
            .find_map(|e| match e {
                ChatEvent::ToolResult { content, .. } => Some(content.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(preview.chars().count(), 500);
        // The model still gets the whole file
        assert!(backend.last_request()[3].content.ends_with(&long));
    }
}
