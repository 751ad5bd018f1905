//! Completion backends.
//!
//! The agent loop talks to a language model through [`CompletionBackend`]:
//! a message list plus the tool catalog in, text and tool calls out. Two
//! HTTP backends are provided:
//! - OpenAI-compatible chat completions
//! - Anthropic messages
//!
//! The backend is selected via `[backend].provider` in workcell.toml.

mod anthropic;
mod http;
#[cfg(test)]
pub(crate) mod mock;
mod openai;

pub use anthropic::AnthropicBackend;
pub use openai::OpenAiBackend;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::BackendConfig;
use crate::tools::{ToolCall, ToolDefinition};

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt.
    System,
    /// Human input.
    User,
    /// Model output, possibly with tool calls.
    Assistant,
    /// Output of a tool call.
    Tool,
}

/// One conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who wrote the message.
    pub role: Role,
    /// Message text. Empty for tool-only assistant turns.
    #[serde(default)]
    pub content: String,
    /// Calls requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// The call a tool message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name on tool messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    /// System message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// User message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Assistant message without tool calls.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// An assistant turn that requested tools.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// The result of one tool call, answered by correlation id.
    pub fn tool(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            name: Some(call.name.clone()),
            ..Self::new(Role::Tool, content)
        }
    }
}

/// Input to one completion call.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    /// Full conversation, system prompt first.
    pub messages: &'a [Message],
    /// Tool catalog offered to the model.
    pub tools: &'a [ToolDefinition],
    /// Sampling temperature.
    pub temperature: f32,
    /// Cap on generated tokens.
    pub max_tokens: u32,
}

/// Token accounting reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Generated tokens.
    pub output_tokens: u64,
}

impl Usage {
    /// Prompt plus generated tokens.
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Output of one completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    /// Text of the answer, empty when only tools were requested.
    pub content: String,
    /// Tools the model wants run, in order.
    pub tool_calls: Vec<ToolCall>,
    /// Model that actually answered.
    pub model: String,
    /// Token accounting.
    pub usage: Usage,
    /// Wall-clock time of the call, retries included.
    pub latency: Duration,
    /// Why generation stopped, as reported by the provider.
    pub finish_reason: String,
}

/// A language model that can answer with text or tool calls.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Run one completion over the full message list.
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<CompletionResponse>;
}

/// Supported completion providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Provider {
    /// OpenAI chat completions, or any compatible endpoint.
    #[default]
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
}

impl Provider {
    /// Model used when none is configured.
    pub fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o",
            Self::Anthropic => "claude-sonnet-4-20250514",
        }
    }

    /// API base URL used when none is configured.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
        }
    }

    /// Environment variable read for the API key when none is configured.
    pub fn default_api_key_env(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            _ => anyhow::bail!("Unknown backend provider: '{s}'. Supported: openai, anthropic"),
        }
    }
}

/// Connection settings shared by the HTTP backends.
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_retries: u32,
}

/// Build the configured backend, reading its API key from the environment.
pub fn build_backend(config: &BackendConfig) -> Result<Arc<dyn CompletionBackend>> {
    build_backend_with_env(config, |name| std::env::var(name).ok())
}

fn build_backend_with_env(
    config: &BackendConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn CompletionBackend>> {
    let provider = config.get_provider()?;

    let key_env = config
        .api_key_env
        .as_deref()
        .unwrap_or_else(|| provider.default_api_key_env());
    let api_key = env(key_env)
        .filter(|k| !k.trim().is_empty())
        .with_context(|| format!("{key_env} is not set; the {provider} backend needs an API key"))?;

    let endpoint = Endpoint {
        base_url: config
            .base_url
            .clone()
            .unwrap_or_else(|| provider.default_base_url().to_string()),
        api_key,
        model: config
            .model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string()),
        max_retries: config.max_retries,
    };

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    debug!("Using {} backend with model {}", provider, endpoint.model);
    Ok(match provider {
        Provider::OpenAi => Arc::new(OpenAiBackend::new(http, endpoint)),
        Provider::Anthropic => Arc::new(AnthropicBackend::new(http, endpoint)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_display() {
        assert_eq!(format!("{}", Provider::OpenAi), "openai");
        assert_eq!(format!("{}", Provider::Anthropic), "anthropic");
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("openai".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert_eq!("Anthropic".parse::<Provider>().unwrap(), Provider::Anthropic);
        assert!("cursor".parse::<Provider>().is_err());
    }

    #[test]
    fn test_tool_message_carries_call_id() {
        let call = ToolCall {
            id: "call_7".to_string(),
            name: "read_file".to_string(),
            arguments: json!({"path": "a.py"}),
        };
        let message = Message::tool(&call, "contents");
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("call_7"));
        assert_eq!(message.name.as_deref(), Some("read_file"));
    }

    #[test]
    fn test_message_history_deserializes_minimal_records() {
        let history: Vec<Message> = serde_json::from_value(json!([
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": "hello"},
        ]))
        .unwrap();
        assert_eq!(history[0], Message::user("hi"));
        assert_eq!(history[1], Message::assistant("hello"));
    }

    #[test]
    fn test_build_backend_requires_api_key() {
        let config = BackendConfig::default();
        let err = build_backend_with_env(&config, |_| None).err().unwrap();
        assert!(err.to_string().contains("OPENAI_API_KEY"));

        let config = BackendConfig {
            provider: "anthropic".to_string(),
            api_key_env: Some("MY_KEY".to_string()),
            ..BackendConfig::default()
        };
        let backend = build_backend_with_env(&config, |name| {
            (name == "MY_KEY").then(|| "secret".to_string())
        })
        .unwrap();
        assert_eq!(backend.name(), "anthropic");
    }

    #[test]
    fn test_usage_total() {
        let usage = Usage {
            input_tokens: 10,
            output_tokens: 5,
        };
        assert_eq!(usage.total(), 15);
    }
}
