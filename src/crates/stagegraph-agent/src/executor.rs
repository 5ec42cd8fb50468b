//! `CodergenExecutor`: the [`stagegraph_core::handler::StageExecutor`]
//! bridge from a `codergen`/`tool` graph node to one Agent Session Loop
//! run, and the per-stage logs directory writer (§6:
//! `<logsRoot>/<nodeId>/{prompt.md,response.md,tool_calls.jsonl,status.json}`).
//!
//! Grounded on `stagegraph-core`'s own `DelegatingHandler` (it is the
//! caller of this trait) and on `WaitHumanHandler` for the shape of a
//! handler that turns an external wait into an [`Outcome`].

use crate::environment::ExecutionEnvironment;
use crate::session::{AgentSession, SessionConfig, SessionState};
use crate::tools::ToolRegistry;
use crate::turn::Turn;
use async_trait::async_trait;
use serde_json::json;
use stagegraph_core::context::Context;
use stagegraph_core::event_bus::EventBus;
use stagegraph_core::graph::Node;
use stagegraph_core::handler::StageExecutor;
use stagegraph_core::outcome::Outcome;
use stagegraph_llm::LlmClient;
use std::path::PathBuf;
use std::sync::Arc;

/// Bridges one `codergen`/`tool` node to an [`AgentSession`] run,
/// rendering the node's `prompt` attribute against the current
/// [`Context`] with `{{key}}` substitution and translating the
/// session's outcome back into an [`Outcome`] the engine understands.
pub struct CodergenExecutor {
    llm: Arc<dyn LlmClient>,
    env: Arc<dyn ExecutionEnvironment>,
    tools: ToolRegistry,
    bus: EventBus,
    default_config: SessionConfig,
    /// Root directory stage logs are written under; `None` disables
    /// logging entirely (a test harness with no durable workspace).
    logs_root: Option<PathBuf>,
}

impl CodergenExecutor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        env: Arc<dyn ExecutionEnvironment>,
        tools: ToolRegistry,
        bus: EventBus,
        default_config: SessionConfig,
        logs_root: Option<PathBuf>,
    ) -> Self {
        Self { llm, env, tools, bus, default_config, logs_root }
    }

    fn session_config_for(&self, node: &Node) -> SessionConfig {
        let mut config = self.default_config.clone();
        if let Some(model) = &node.attrs.llm_model {
            config.model = model.clone();
        }
        if let Some(provider) = &node.attrs.llm_provider {
            config.provider = Some(provider.clone());
        }
        if let Some(effort) = &node.attrs.reasoning_effort {
            config.reasoning_effort = Some(effort.clone());
        }
        config
    }

    async fn write_logs(&self, node: &Node, session: &AgentSession, outcome: &Outcome) {
        let Some(root) = &self.logs_root else { return };
        let dir = root.join(&node.id);
        if tokio::fs::create_dir_all(&dir).await.is_err() {
            return;
        }

        if let Some(Turn::User { text }) = session.history().first() {
            let _ = tokio::fs::write(dir.join("prompt.md"), text).await;
        }
        let _ = tokio::fs::write(dir.join("response.md"), session.last_assistant_text()).await;

        let mut tool_call_lines = Vec::new();
        for turn in session.history() {
            if let Turn::Assistant { tool_calls, .. } = turn {
                for call in tool_calls {
                    tool_call_lines.push(json!({"id": call.id, "name": call.name, "args": call.args}).to_string());
                }
            }
        }
        let _ = tokio::fs::write(dir.join("tool_calls.jsonl"), tool_call_lines.join("\n")).await;

        let status = json!({
            "status": outcome.status,
            "failure_reason": outcome.failure_reason,
        });
        let _ = tokio::fs::write(dir.join("status.json"), status.to_string()).await;
    }
}

/// Substitute every `{{key}}` in `template` with `context.get_string(key,
/// "")` (§3 "Supplemented features": prompt templating against the run
/// context — the distilled spec names the `prompt` node attribute but
/// leaves its templating mechanism to this bridge).
fn render_prompt(template: &str, context: &Context) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        rendered.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) => {
                let key = after_open[..end].trim();
                rendered.push_str(&context.get_string(key, ""));
                rest = &after_open[end + 2..];
            }
            None => {
                rendered.push_str("{{");
                rest = after_open;
            }
        }
    }
    rendered.push_str(rest);
    rendered
}

#[async_trait]
impl StageExecutor for CodergenExecutor {
    async fn run(&self, node: &Node, context: &Context) -> anyhow::Result<Outcome> {
        let prompt = render_prompt(node.attrs.prompt.as_deref().unwrap_or(""), context);
        let config = self.session_config_for(node);
        let mut session =
            AgentSession::new(config, self.env.clone(), self.llm.clone(), self.tools.clone(), self.bus.clone(), 0);

        let outcome = match session.submit(prompt).await {
            Ok(()) if session.state() == SessionState::AwaitingInput => {
                Outcome::success().with_context_update("last_response", json!(session.last_assistant_text()))
            }
            Ok(()) => Outcome::fail("agent session closed before producing a response"),
            Err(e) => Outcome::fail(e.to_string()),
        };

        self.write_logs(node, &session, &outcome).await;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json as jsonval;

    #[test]
    fn render_prompt_substitutes_known_keys() {
        let mut context = Context::new();
        context.set("goal", jsonval("ship the feature"));
        let rendered = render_prompt("Work on: {{goal}}.", &context);
        assert_eq!(rendered, "Work on: ship the feature.");
    }

    #[test]
    fn render_prompt_leaves_unknown_keys_blank() {
        let context = Context::new();
        let rendered = render_prompt("{{missing}} start", &context);
        assert_eq!(rendered, " start");
    }

    #[test]
    fn render_prompt_tolerates_an_unterminated_placeholder() {
        let context = Context::new();
        let rendered = render_prompt("a {{ unterminated", &context);
        assert_eq!(rendered, "a {{ unterminated");
    }
}
