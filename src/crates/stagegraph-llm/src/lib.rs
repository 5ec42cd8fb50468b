//! # stagegraph-llm — the LLM Client contract
//!
//! The Agent Session (`stagegraph-agent`) drives one LLM call per
//! iteration of its `runLoop` through a single trait, [`LlmClient`]. This
//! crate defines that contract and the wire-shaped types around it —
//! [`CompletionRequest`], [`CompletionResponse`], [`ChatMessage`] — and
//! nothing else. Concrete provider adapters (an Anthropic client, a
//! local llama.cpp server, the deterministic double `stagegraph-cli`
//! wires up for its demo run) live outside this crate; shipping one here
//! would pull in an HTTP stack this repository's scope explicitly
//! excludes.
//!
//! A message's content is a list of typed parts rather than a single
//! string so one assistant turn can carry text, a thinking block, and
//! one or more tool calls together, matching how the richer providers
//! (and the Agent Session's own turn history) actually shape a response.

pub mod config;
pub mod error;

pub use config::LlmConfig;
pub use error::{LlmError, Result};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One piece of a message's content. A single assistant message may
/// carry several parts: some text, a thinking block, and any number of
/// tool calls, in the order the model produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ToolCall { id: String, name: String, arguments: Value },
    ToolResult { tool_call_id: String, content: String, is_error: bool },
    Thinking { text: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error,
        }
    }
}

/// One turn in a [`CompletionRequest`]'s message list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn assistant(content: Vec<ContentPart>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    pub fn tool(content: Vec<ContentPart>) -> Self {
        Self {
            role: Role::Tool,
            content,
        }
    }

    /// Concatenation of every [`ContentPart::Text`] part, in order.
    /// Empty string (not `None`) when the message carries no text part,
    /// matching the rest of this crate's no-fail accessor convention.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Every [`ContentPart::ToolCall`] part, in the order the model
    /// emitted them.
    pub fn tool_calls(&self) -> Vec<(&str, &str, &Value)> {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolCall { id, name, arguments } => {
                    Some((id.as_str(), name.as_str(), arguments))
                }
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content.iter().any(|p| matches!(p, ContentPart::ToolCall { .. }))
    }
}

/// A tool the model may call, advertised by name/description/JSON-schema
/// parameters — mirrors [`CompletionRequest::tools`] straight through to
/// the provider's own tool-definition wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Whether the model must, may, or must not call a tool this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
}

/// One call to [`LlmClient::complete`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
    pub reasoning_effort: Option<String>,
    pub provider: Option<String>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            tool_choice: None,
            reasoning_effort: None,
            provider: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = Some(effort.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other,
}

/// Token accounting for one [`CompletionResponse`], used by the session's
/// context-usage warning (§4.K).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

/// The result of one [`LlmClient::complete`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub message: ChatMessage,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

/// The seam `stagegraph-agent`'s session loop calls through. One
/// implementation per provider; this crate ships none, only the
/// contract, per its Non-goals.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_concatenates_text_parts_only() {
        let msg = ChatMessage::assistant(vec![
            ContentPart::text("hello "),
            ContentPart::tool_call("1", "read_file", json!({"path": "a.rs"})),
            ContentPart::text("world"),
        ]);
        assert_eq!(msg.text(), "hello world");
    }

    #[test]
    fn tool_calls_extracts_in_order() {
        let msg = ChatMessage::assistant(vec![
            ContentPart::tool_call("1", "read_file", json!({"path": "a.rs"})),
            ContentPart::tool_call("2", "grep", json!({"pattern": "TODO"})),
        ]);
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, "read_file");
        assert_eq!(calls[1].1, "grep");
    }

    #[test]
    fn user_message_has_no_tool_calls() {
        let msg = ChatMessage::user("hi");
        assert!(!msg.has_tool_calls());
        assert_eq!(msg.text(), "hi");
    }

    #[test]
    fn request_builder_sets_optional_fields() {
        let req = CompletionRequest::new("gpt-5", vec![ChatMessage::user("hi")])
            .with_tool_choice(ToolChoice::Auto)
            .with_reasoning_effort("high")
            .with_provider("openai");

        assert_eq!(req.tool_choice, Some(ToolChoice::Auto));
        assert_eq!(req.reasoning_effort.as_deref(), Some("high"));
        assert_eq!(req.provider.as_deref(), Some("openai"));
    }

    #[test]
    fn completion_response_roundtrips_through_json() {
        let resp = CompletionResponse {
            id: "resp_1".to_string(),
            message: ChatMessage::assistant(vec![ContentPart::text("done")]),
            finish_reason: FinishReason::Stop,
            usage: Usage { input: 10, output: 5, total: 15 },
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: CompletionResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "resp_1");
        assert_eq!(back.finish_reason, FinishReason::Stop);
    }
}
