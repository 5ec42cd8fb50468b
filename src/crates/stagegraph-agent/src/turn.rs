//! The agent session's append-only history (§4.K, §8 invariant 5): a
//! `Vec<Turn>` that only ever grows, never rewrites or removes an entry.
//!
//! A [`Turn`] is one of four shapes. `User`/`Steering` both carry plain
//! text and differ only in how they got into the queue (top-level
//! `submit`/`followUp` vs. mid-turn `steer`); `Assistant` is one LLM
//! response, optionally followed by tool calls; `ToolResults` bundles the
//! results of dispatching an assistant turn's tool calls, always in the
//! same order the calls were made.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stagegraph_llm::{ChatMessage, ContentPart, Role};

/// One call the model made in an [`Turn::Assistant`] turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    /// `name` plus the canonical-JSON form of `args` (§3 "tool-call
    /// signature canonicalization"): the unit loop detection (§4.K) slides
    /// its window over.
    pub fn signature(&self) -> String {
        let canonical = stagegraph_toolkit::serialization::stable_json_string(&self.args)
            .unwrap_or_else(|_| self.args.to_string());
        format!("{}:{}", self.name, canonical)
    }
}

/// The outcome of dispatching one [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// One entry in a session's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    /// A message submitted via `submit`/`followUp`.
    User { text: String },
    /// A message injected mid-turn via `steer`, drained at the next
    /// steering checkpoint rather than queued behind the run loop.
    Steering { text: String },
    /// One LLM response: optional text, optional reasoning/thinking
    /// content, and zero or more tool calls in the order the model made
    /// them.
    Assistant {
        text: String,
        #[serde(default)]
        reasoning: Option<String>,
        #[serde(default)]
        tool_calls: Vec<ToolCall>,
    },
    /// The results of dispatching the tool calls of the preceding
    /// `Assistant` turn, in the original call order (§5 ordering
    /// guarantees) — not completion order.
    ToolResults { results: Vec<ToolResult> },
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    pub fn steering(text: impl Into<String>) -> Self {
        Self::Steering { text: text.into() }
    }

    pub fn assistant(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            text: text.into(),
            reasoning: None,
            tool_calls,
        }
    }

    pub fn assistant_with_reasoning(
        text: impl Into<String>,
        reasoning: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self::Assistant {
            text: text.into(),
            reasoning: Some(reasoning.into()),
            tool_calls,
        }
    }

    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self::ToolResults { results }
    }

    /// The tool calls of an `Assistant` turn, empty for every other kind.
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// Rough size of this turn's textual content, used by the session's
    /// context-usage estimate (§4.K: `sum(text lengths)/4`).
    pub fn text_len(&self) -> usize {
        match self {
            Self::User { text } | Self::Steering { text } => text.len(),
            Self::Assistant { text, reasoning, tool_calls } => {
                text.len()
                    + reasoning.as_ref().map_or(0, |r| r.len())
                    + tool_calls.iter().map(|c| c.args.to_string().len()).sum::<usize>()
            }
            Self::ToolResults { results } => results.iter().map(|r| r.content.len()).sum(),
        }
    }
}

/// Project an append-only history onto the LLM Client's message list
/// (§6 History→LLM-message projection rules): `User`/`Steering` turns
/// each become one user message; `Assistant` turns become one assistant
/// message with an optional text part followed by one tool-call part per
/// call, in order; `ToolResults` turns become one tool-role message per
/// result, each carrying `tool_call_id`/`content`/`is_error`.
pub fn to_chat_messages(history: &[Turn]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len());
    for turn in history {
        match turn {
            Turn::User { text } | Turn::Steering { text } => {
                messages.push(ChatMessage::user(text.clone()));
            }
            Turn::Assistant { text, tool_calls, .. } => {
                let mut parts = Vec::new();
                if !text.is_empty() {
                    parts.push(ContentPart::text(text.clone()));
                }
                for call in tool_calls {
                    parts.push(ContentPart::tool_call(
                        call.id.clone(),
                        call.name.clone(),
                        call.args.clone(),
                    ));
                }
                messages.push(ChatMessage::assistant(parts));
            }
            Turn::ToolResults { results } => {
                for result in results {
                    messages.push(ChatMessage::tool(vec![ContentPart::tool_result(
                        result.tool_call_id.clone(),
                        result.content.clone(),
                        result.is_error,
                    )]));
                }
            }
        }
    }
    messages
}

/// Every tool-result message's role really is [`Role::Tool`]; this
/// assertion-free helper exists only so call sites reading the
/// projection don't need to re-derive that from `to_chat_messages`.
pub fn is_tool_message(message: &ChatMessage) -> bool {
    message.role == Role::Tool
}
