//! A deterministic, in-process `ChatModel` double (§3 "Supplemented
//! features"): `stagegraph-llm` ships no provider adapters by design, so
//! this is what the CLI's `run` subcommand and the workspace's own
//! integration tests wire up instead of a real HTTP client. Grounded in
//! the session loop's own `ScriptedLlmClient` test double
//! (`stagegraph-agent/src/session.rs`), but unconditional rather than
//! scripted: every call finishes immediately with a text-only reply, so a
//! `run` against any graph terminates in one round without a real model.

use async_trait::async_trait;
use stagegraph_llm::{ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmClient, Result, Usage};
use std::sync::atomic::{AtomicU64, Ordering};

pub struct DeterministicEchoClient {
    calls: AtomicU64,
}

impl DeterministicEchoClient {
    pub fn new() -> Self {
        Self { calls: AtomicU64::new(0) }
    }
}

impl Default for DeterministicEchoClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for DeterministicEchoClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let last_user_text = request
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, stagegraph_llm::Role::User))
            .map(ChatMessage::text)
            .unwrap_or_default();

        let text = format!(
            "[mock response #{call} to model '{}'] acknowledged: {}",
            request.model, last_user_text
        );

        Ok(CompletionResponse {
            id: format!("mock-{call}"),
            message: ChatMessage::assistant(vec![stagegraph_llm::ContentPart::text(text)]),
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
        })
    }
}
