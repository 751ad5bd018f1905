//! Scripted completion backend for tests.
//!
//! Returns predetermined replies and records every request so tests can
//! assert on the conversation the agent built.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{CompletionBackend, CompletionRequest, CompletionResponse, Message, Usage};
use crate::tools::ToolCall;

/// A single scripted reply.
#[derive(Debug, Clone)]
pub(crate) enum MockReply {
    /// Final answer with no tool calls.
    Text(String),
    /// Tool calls as `(id, name, arguments)`.
    Tools(Vec<(String, String, Value)>),
    /// Fail the completion call.
    Error(String),
}

impl MockReply {
    pub fn text(content: &str) -> Self {
        Self::Text(content.to_string())
    }

    pub fn tool(id: &str, name: &str, arguments: Value) -> Self {
        Self::Tools(vec![(id.to_string(), name.to_string(), arguments)])
    }
}

/// Replays replies in order, cycling when exhausted.
#[derive(Debug, Clone)]
pub(crate) struct MockBackend {
    replies: Arc<Vec<MockReply>>,
    invocation_count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockBackend {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Arc::new(replies),
            invocation_count: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of times `complete` was called.
    pub fn invocation_count(&self) -> usize {
        self.invocation_count.load(Ordering::SeqCst)
    }

    /// Messages sent on the most recent call.
    pub fn last_request(&self) -> Vec<Message> {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl CompletionBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<CompletionResponse> {
        let count = self.invocation_count.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push(request.messages.to_vec());

        let (content, tool_calls) = match &self.replies[count % self.replies.len()] {
            MockReply::Text(text) => (text.clone(), Vec::new()),
            MockReply::Tools(calls) => (
                String::new(),
                calls
                    .iter()
                    .map(|(id, name, arguments)| ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: arguments.clone(),
                    })
                    .collect(),
            ),
            MockReply::Error(message) => anyhow::bail!("{message}"),
        };

        Ok(CompletionResponse {
            finish_reason: if tool_calls.is_empty() { "stop" } else { "tool_calls" }.to_string(),
            content,
            tool_calls,
            model: "mock".to_string(),
            usage: Usage::default(),
            latency: Duration::ZERO,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(messages: &[Message]) -> CompletionRequest<'_> {
        CompletionRequest {
            messages,
            tools: &[],
            temperature: 0.0,
            max_tokens: 10,
        }
    }

    #[tokio::test]
    async fn test_mock_cycles_and_counts() {
        let backend = MockBackend::new(vec![MockReply::text("first"), MockReply::text("second")]);
        let messages = [Message::user("hi")];

        let r1 = backend.complete(&request(&messages)).await.unwrap();
        let r2 = backend.complete(&request(&messages)).await.unwrap();
        let r3 = backend.complete(&request(&messages)).await.unwrap();

        assert_eq!(r1.content, "first");
        assert_eq!(r2.content, "second");
        assert_eq!(r3.content, "first");
        assert_eq!(backend.invocation_count(), 3);
        assert_eq!(backend.last_request(), messages.to_vec());
    }

    #[tokio::test]
    async fn test_mock_error() {
        let backend = MockBackend::new(vec![MockReply::Error("boom".to_string())]);
        let err = backend.complete(&request(&[])).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
