//! OpenAI chat-completions backend.
//!
//! Also works with compatible endpoints (Together, Groq, vLLM) via `base_url`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::debug;

use super::http::post_json;
use super::{CompletionBackend, CompletionRequest, CompletionResponse, Endpoint, Message, Role, Usage};
use crate::tools::{ToolCall, ToolDefinition};

/// OpenAI chat-completions backend, also used for compatible servers.
pub struct OpenAiBackend {
    http: reqwest::Client,
    endpoint: Endpoint,
}

impl OpenAiBackend {
    pub(crate) fn new(http: reqwest::Client, endpoint: Endpoint) -> Self {
        Self { http, endpoint }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.endpoint.api_key))
            .context("API key is not a valid header value")?;
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<CompletionResponse> {
        let body = request_body(&self.endpoint.model, request);
        let url = format!("{}/chat/completions", self.endpoint.base_url.trim_end_matches('/'));

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
            "openai: {} tokens, finish_reason={}, {} tool calls",
            response.usage.total(),
            response.finish_reason,
            response.tool_calls.len()
        );
        Ok(response)
    }
}

fn request_body(model: &str, request: &CompletionRequest<'_>) -> Value {
    let mut body = json!({
        "model": model,
        "messages": format_messages(request.messages),
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
    });
    if !request.tools.is_empty() {
        body["tools"] = Value::Array(request.tools.iter().map(format_tool).collect());
        body["tool_choice"] = json!("auto");
    }
    body
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn format_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            let mut entry = json!({
                "role": role_name(message.role),
                "content": message.content,
            });
            if !message.tool_calls.is_empty() {
                entry["tool_calls"] = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            },
                        })
                    })
                    .collect();
                if message.content.is_empty() {
                    entry["content"] = Value::Null;
                }
            }
            if let Some(id) = &message.tool_call_id {
                entry["tool_call_id"] = json!(id);
            }
            entry
        })
        .collect()
}

fn format_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        },
    })
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Arguments arrive as a JSON string; anything unparseable is kept as `{"raw": s}`.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| json!({ "raw": raw }))
}

fn parse_response(raw: Value, latency: Duration) -> Result<CompletionResponse> {
    let response: ChatResponse =
        serde_json::from_value(raw).context("Unexpected chat completion response")?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .context("Chat completion response has no choices")?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolCall {
            id: call.id,
            name: call.function.name,
            arguments: parse_arguments(&call.function.arguments),
        })
        .collect();
    let usage = response.usage.map_or_else(Usage::default, |u| Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
    });

    Ok(CompletionResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        model: response.model,
        usage,
        latency,
        finish_reason: choice.finish_reason.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tool_call_exchange() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "create_file".to_string(),
            arguments: json!({"path": "app.py", "content": "print('hi')"}),
        };
        let messages = vec![
            Message::system("sys"),
            Message::user("make app.py"),
            Message::assistant_with_tools("", vec![call.clone()]),
            Message::tool(&call, "File created: app.py"),
        ];
        let wire = format_messages(&messages);

        assert_eq!(wire[0], json!({"role": "system", "content": "sys"}));
        assert_eq!(wire[2]["content"], Value::Null);
        assert_eq!(wire[2]["tool_calls"][0]["type"], "function");
        assert_eq!(wire[2]["tool_calls"][0]["function"]["name"], "create_file");
        let arguments: Value = serde_json::from_str(
            wire[2]["tool_calls"][0]["function"]["arguments"].as_str().unwrap(),
        )
        .unwrap();
        assert_eq!(arguments["path"], "app.py");
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "call_1");
    }

    #[test]
    fn test_request_body_includes_tools() {
        let tools = crate::tools::catalog();
        let messages = [Message::user("hi")];
        let request = CompletionRequest {
            messages: &messages,
            tools: &tools,
            temperature: 0.2,
            max_tokens: 4096,
        };
        let body = request_body("gpt-4o", &request);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["tools"].as_array().unwrap().len(), tools.len());
        assert_eq!(body["tools"][0]["function"]["name"], "read_file");
        assert_eq!(body["tool_choice"], "auto");
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let raw = json!({
            "model": "gpt-4o-2024",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {"id": "a", "type": "function", "function": {"name": "read_file", "arguments": "{\"path\":\"x.py\"}"}},
                        {"id": "b", "type": "function", "function": {"name": "git_status", "arguments": "not json"}},
                    ],
                },
                "finish_reason": "tool_calls",
            }],
            "usage": {"prompt_tokens": 100, "completion_tokens": 20, "total_tokens": 120},
        });
        let response = parse_response(raw, Duration::from_millis(5)).unwrap();

        assert_eq!(response.content, "");
        assert_eq!(response.model, "gpt-4o-2024");
        assert_eq!(response.finish_reason, "tool_calls");
        assert_eq!(response.usage.total(), 120);
        assert_eq!(response.tool_calls[0].arguments, json!({"path": "x.py"}));
        assert_eq!(response.tool_calls[1].arguments, json!({"raw": "not json"}));
    }

    #[test]
    fn test_parse_response_with_null_tool_calls() {
        let raw = json!({
            "model": "local-model",
            "choices": [{
                "message": {"role": "assistant", "content": "Hi there", "tool_calls": null},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5},
        });
        let response = parse_response(raw, Duration::ZERO).unwrap();

        assert_eq!(response.content, "Hi there");
        assert!(response.tool_calls.is_empty());
    }

    #[test]
    fn test_parse_response_without_choices_fails() {
        let err = parse_response(json!({"choices": []}), Duration::ZERO).unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }
}
