//! Anthropic messages backend.
//!
//! The wire format differs from chat completions in three ways: the system
//! prompt is a top-level field, tool calls are `tool_use` content blocks, and
//! tool results go back as `tool_result` blocks inside a user message.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::debug;

use super::http::post_json;
use super::{CompletionBackend, CompletionRequest, CompletionResponse, Endpoint, Message, Role, Usage};
use crate::tools::{ToolCall, ToolDefinition};

const API_VERSION: &str = "2023-06-01";

/// Anthropic messages API backend.
pub struct AnthropicBackend {
    http: reqwest::Client,
    endpoint: Endpoint,
}

impl AnthropicBackend {
    pub(crate) fn new(http: reqwest::Client, endpoint: Endpoint) -> Self {
        Self { http, endpoint }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.endpoint.api_key)
                .context("API key is not a valid header value")?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }
}

#[async_trait]
impl CompletionBackend for AnthropicBackend {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<CompletionResponse> {
        let body = request_body(&self.endpoint.model, request);
        let url = format!("{}/messages", self.endpoint.base_url.trim_end_matches('/'));

        let started = Instant::now();
        let raw = post_json(
            &self.http,
            self.name(),
            &url,
            self.headers()?,
            &body,
            self.endpoint.max_retries,
        )
        .await?;
        let response = parse_response(raw, started.elapsed())?;

        debug!(
            "anthropic: {} tokens, stop_reason={}, {} tool calls",
            response.usage.total(),
            response.finish_reason,
            response.tool_calls.len()
        );
        Ok(response)
    }
}

fn request_body(model: &str, request: &CompletionRequest<'_>) -> Value {
    let (system, messages) = format_messages(request.messages);
    let mut body = json!({
        "model": model,
        "messages": messages,
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
    });
    if !system.is_empty() {
        body["system"] = json!(system);
    }
    if !request.tools.is_empty() {
        body["tools"] = Value::Array(request.tools.iter().map(format_tool).collect());
    }
    body
}

/// Split out the system prompt and convert the rest into content blocks.
///
/// Consecutive tool messages are merged into one user message, since the API
/// requires user and assistant turns to alternate.
fn format_messages(messages: &[Message]) -> (String, Vec<Value>) {
    let mut system = Vec::new();
    let mut formatted: Vec<Value> = Vec::new();
    let mut pending_results: Vec<Value> = Vec::new();

    let flush = |pending: &mut Vec<Value>, out: &mut Vec<Value>| {
        if !pending.is_empty() {
            out.push(json!({ "role": "user", "content": std::mem::take(pending) }));
        }
    };

    for message in messages {
        match message.role {
            Role::System => system.push(message.content.as_str()),
            Role::Tool => pending_results.push(json!({
                "type": "tool_result",
                "tool_use_id": message.tool_call_id.as_deref().unwrap_or_default(),
                "content": message.content,
            })),
            Role::Assistant if !message.tool_calls.is_empty() => {
                flush(&mut pending_results, &mut formatted);
                let mut blocks = Vec::new();
                if !message.content.is_empty() {
                    blocks.push(json!({ "type": "text", "text": message.content }));
                }
                blocks.extend(message.tool_calls.iter().map(|call| {
                    json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.arguments,
                    })
                }));
                formatted.push(json!({ "role": "assistant", "content": blocks }));
            }
            Role::Assistant => {
                flush(&mut pending_results, &mut formatted);
                formatted.push(json!({ "role": "assistant", "content": message.content }));
            }
            Role::User => {
                flush(&mut pending_results, &mut formatted);
                formatted.push(json!({ "role": "user", "content": message.content }));
            }
        }
    }
    flush(&mut pending_results, &mut formatted);

    (system.join("\n\n"), formatted)
}

fn format_tool(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

fn parse_response(raw: Value, latency: Duration) -> Result<CompletionResponse> {
    let response: MessagesResponse =
        serde_json::from_value(raw).context("Unexpected messages response")?;

    let mut text = Vec::new();
    let mut tool_calls = Vec::new();
    for block in response.content {
        match block {
            ContentBlock::Text { text: t } => text.push(t),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                name,
                arguments: input,
            }),
            ContentBlock::Other => {}
        }
    }

    let usage = response.usage.map_or_else(Usage::default, |u| Usage {
        input_tokens: u.input_tokens,
        output_tokens: u.output_tokens,
    });

    Ok(CompletionResponse {
        content: text.join("\n"),
        tool_calls,
        model: response.model,
        usage,
        latency,
        finish_reason: response.stop_reason.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: json!({"path": "a.py"}),
        }
    }

    #[test]
    fn test_system_prompt_is_split_out() {
        let messages = [Message::system("be helpful"), Message::user("hi")];
        let (system, wire) = format_messages(&messages);
        assert_eq!(system, "be helpful");
        assert_eq!(wire, vec![json!({"role": "user", "content": "hi"})]);
    }

    #[test]
    fn test_tool_exchange_uses_content_blocks() {
        let first = call("toolu_1", "read_file");
        let second = call("toolu_2", "read_file");
        let messages = [
            Message::user("look"),
            Message::assistant_with_tools("Reading.", vec![first.clone(), second.clone()]),
            Message::tool(&first, "one"),
            Message::tool(&second, "two"),
            Message::assistant("done"),
        ];
        let (_, wire) = format_messages(&messages);

        assert_eq!(wire.len(), 4);
        assert_eq!(wire[1]["content"][0], json!({"type": "text", "text": "Reading."}));
        assert_eq!(wire[1]["content"][1]["type"], "tool_use");
        assert_eq!(wire[1]["content"][2]["id"], "toolu_2");

        // Both results share one user turn
        assert_eq!(wire[2]["role"], "user");
        let results = wire[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["tool_use_id"], "toolu_1");
        assert_eq!(results[1]["content"], "two");
        assert_eq!(wire[3], json!({"role": "assistant", "content": "done"}));
    }

    #[test]
    fn test_request_body_uses_input_schema() {
        let tools = crate::tools::catalog();
        let messages = [Message::system("s"), Message::user("u")];
        let request = CompletionRequest {
            messages: &messages,
            tools: &tools,
            temperature: 0.2,
            max_tokens: 1000,
        };
        let body = request_body("claude-test", &request);
        assert_eq!(body["system"], "s");
        assert_eq!(body["tools"][0]["name"], "read_file");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert!(body["tools"][0].get("parameters").is_none());
    }

    #[test]
    fn test_parse_response_blocks() {
        let raw = json!({
            "model": "claude-test",
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "Creating it."},
                {"type": "tool_use", "id": "toolu_9", "name": "create_file", "input": {"path": "app.py", "content": ""}},
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 50, "output_tokens": 7},
        });
        let response = parse_response(raw, Duration::ZERO).unwrap();
        assert_eq!(response.content, "Creating it.");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "toolu_9");
        assert_eq!(response.tool_calls[0].arguments["path"], "app.py");
        assert_eq!(response.finish_reason, "tool_use");
        assert_eq!(response.usage.total(), 57);
    }
}
