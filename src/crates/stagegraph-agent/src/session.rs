//! The Agent Session Loop (§4.K): an append-only turn history, steering
//! and follow-up queues, and the nine-step `runLoop` that drives one LLM
//! conversation plus its tool calls — including the three sub-agent
//! tools `spawn_agent`/`wait`/`close_agent` — to completion.
//!
//! Grounded on forge-agent's session run loop (build request → call
//! model → append turn → dispatch tool calls → repeat, with a steering
//! queue drained between rounds) but driven by this crate's own
//! [`Turn`] history and carrying this spec's explicit state machine,
//! tool-call signature loop detection, and context-usage warning, none
//! of which forge-agent implements the same way.

use crate::environment::ExecutionEnvironment;
use crate::error::{Result, SessionError};
use crate::project_docs::discover_project_docs;
use crate::supervisor::SubAgentSupervisor;
use crate::tools::ToolRegistry;
use crate::truncate::{truncate, TruncateMode};
use crate::turn::{to_chat_messages, ToolCall, ToolResult, Turn};
use serde_json::Value;
use stagegraph_core::event_bus::{Event, EventBus, Unsubscribe};
use stagegraph_llm::{ChatMessage, CompletionRequest, LlmClient, ToolChoice, ToolDefinition};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Per-tool-call output cap before it re-enters history (§4.I); distinct
/// from [`crate::supervisor`]'s larger `wait` cap, since ordinary tool
/// output is meant to stay terse in-context while a sub-agent transcript
/// is the whole point of the call.
const DEFAULT_TOOL_OUTPUT_TRUNCATE_CHARS: usize = 10_000;

/// Tunable knobs for one session (§4.K "config"). A `0` cap means
/// unlimited.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub provider: Option<String>,
    pub reasoning_effort: Option<String>,
    pub system_prompt: String,
    pub max_tool_rounds_per_input: u32,
    pub max_turns: u32,
    pub loop_detection_window: usize,
    pub context_window_size: u64,
    pub max_subagent_depth: u32,
    /// Whether the active model profile advertises parallel tool calls
    /// (§4.K dispatch rule). When true and a round has more than one
    /// tool call, they run concurrently instead of one at a time.
    pub supports_parallel_tool_calls: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let engine_defaults = stagegraph_toolkit::config::EngineConfig::default();
        Self {
            model: "default".to_string(),
            provider: None,
            reasoning_effort: None,
            system_prompt: String::new(),
            max_tool_rounds_per_input: engine_defaults.max_tool_rounds_per_input,
            max_turns: engine_defaults.max_turns,
            loop_detection_window: engine_defaults.loop_detection_window,
            context_window_size: engine_defaults.context_window_size as u64,
            max_subagent_depth: 3,
            supports_parallel_tool_calls: false,
        }
    }
}

impl SessionConfig {
    /// Build a [`SessionConfig`] from the shared `STAGEGRAPH_`-namespaced
    /// [`stagegraph_toolkit::config::EngineConfig`] (§2.2), the same
    /// tunables `stagegraph-core`'s engine falls back to, plus the
    /// per-session fields the engine doesn't know about.
    pub fn from_engine_config(
        engine: &stagegraph_toolkit::config::EngineConfig,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            provider: None,
            reasoning_effort: None,
            system_prompt: system_prompt.into(),
            max_tool_rounds_per_input: engine.max_tool_rounds_per_input,
            max_turns: engine.max_turns,
            loop_detection_window: engine.loop_detection_window,
            context_window_size: engine.context_window_size as u64,
            max_subagent_depth: 3,
            supports_parallel_tool_calls: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Processing,
    AwaitingInput,
    Closed,
}

pub struct AgentSession {
    id: String,
    state: SessionState,
    history: Vec<Turn>,
    steering: VecDeque<String>,
    followup: VecDeque<String>,
    config: SessionConfig,
    env: Arc<dyn ExecutionEnvironment>,
    llm: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    bus: EventBus,
    supervisor: SubAgentSupervisor,
    cancelled: Arc<AtomicBool>,
    turns_used: u32,
}

impl AgentSession {
    pub fn new(
        config: SessionConfig,
        env: Arc<dyn ExecutionEnvironment>,
        llm: Arc<dyn LlmClient>,
        tools: ToolRegistry,
        bus: EventBus,
        subagent_depth: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state: SessionState::Idle,
            history: Vec::new(),
            steering: VecDeque::new(),
            followup: VecDeque::new(),
            supervisor: SubAgentSupervisor::new(subagent_depth, config.max_subagent_depth),
            config,
            env,
            llm,
            tools,
            bus,
            cancelled: Arc::new(AtomicBool::new(false)),
            turns_used: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    fn emit(&self, kind: &str, payload: Vec<(&str, Value)>) {
        let mut event = Event::new(kind.to_string(), self.id.clone());
        for (key, value) in payload {
            event = event.with(key, value);
        }
        self.bus.emit(event);
    }

    /// §4.K op 1: run `text` as the next user turn. A session already
    /// `Processing` queues it onto `followUp` instead of re-entering the
    /// loop concurrently (§8 invariant: at most one `runLoop` in flight).
    pub async fn submit(&mut self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        if self.state == SessionState::Closed {
            return Ok(());
        }
        if self.state == SessionState::Processing {
            self.followup.push_back(text);
            return Ok(());
        }
        self.enter_processing(text).await
    }

    async fn enter_processing(&mut self, text: String) -> Result<()> {
        if self.history.is_empty() {
            self.emit("SESSION_START", vec![]);
        }
        self.state = SessionState::Processing;
        self.history.push(Turn::user(text.clone()));
        self.turns_used += 1;
        self.emit("USER_INPUT", vec![("text", Value::String(text))]);

        let result = self.run_loop().await;

        if result.is_ok() && self.state != SessionState::Closed {
            if let Some(next) = self.followup.pop_front() {
                return Box::pin(self.enter_processing(next)).await;
            }
            self.state = SessionState::AwaitingInput;
        }
        result
    }

    /// §4.K op 2: inject `text` as a `Steering` turn, drained at the next
    /// checkpoint inside an in-flight `runLoop` rather than queued behind
    /// it.
    pub fn steer(&mut self, text: impl Into<String>) {
        self.steering.push_back(text.into());
    }

    /// §4.K op 3: queue `text` to run only once the current `submit` (and
    /// any already-queued follow-ups) finishes.
    pub fn follow_up(&mut self, text: impl Into<String>) {
        self.followup.push_back(text.into());
    }

    /// §4.K op 4: request cancellation. Checked at the top of each loop
    /// iteration, never mid-tool-call.
    pub fn abort(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// §4.K op 5: stop accepting new input. Idempotent.
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            self.emit("SESSION_END", vec![]);
        }
        self.state = SessionState::Closed;
    }

    /// §4.K op 6: subscribe to this session's event stream.
    pub fn on_event(&self, callback: impl Fn(&Event) + Send + Sync + 'static) -> Unsubscribe {
        self.bus.subscribe(self.id.clone(), callback)
    }

    /// The text of the last `Assistant` turn, empty if none yet — what a
    /// parent's `wait` receives once this session is a sub-agent.
    pub fn last_assistant_text(&self) -> String {
        self.history
            .iter()
            .rev()
            .find_map(|turn| match turn {
                Turn::Assistant { text, .. } => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn drain_steering(&mut self) {
        while let Some(text) = self.steering.pop_front() {
            self.history.push(Turn::steering(text.clone()));
            self.emit("STEERING_INJECTED", vec![("text", Value::String(text))]);
        }
    }

    /// `sum(text lengths)/4` as a crude token estimate, divided by the
    /// configured context window (§4.K).
    fn context_usage_fraction(&self) -> f64 {
        let total_chars: usize = self.history.iter().map(Turn::text_len).sum();
        (total_chars / 4) as f64 / self.config.context_window_size.max(1) as f64
    }

    /// Tool-call signature sliding-window loop detection (§4.K): true if
    /// the last `loop_detection_window` signatures are exactly a pattern
    /// of length 1, 2, or 3 repeated to fill the window.
    fn detect_loop(&self) -> bool {
        let window = self.config.loop_detection_window;
        if window < 2 {
            return false;
        }
        let signatures: Vec<String> =
            self.history.iter().flat_map(Turn::tool_calls).map(ToolCall::signature).collect();
        if signatures.len() < window {
            return false;
        }
        let tail = &signatures[signatures.len() - window..];
        (1..=3).filter(|len| window % len == 0).any(|pattern_len| {
            let pattern = &tail[..pattern_len];
            tail.chunks(pattern_len).all(|chunk| chunk == pattern)
        })
    }

    async fn run_loop(&mut self) -> Result<()> {
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                self.close();
                return Ok(());
            }
            if self.config.max_turns > 0 && self.turns_used >= self.config.max_turns {
                self.emit("TURN_LIMIT", vec![("limit", Value::from(self.config.max_turns))]);
                return Ok(());
            }

            self.drain_steering();

            let request = self.build_request().await;
            self.emit("ASSISTANT_TEXT_START", vec![]);
            let response = match self.llm.complete(request).await {
                Ok(response) => response,
                Err(e) => {
                    self.emit("ERROR", vec![("message", Value::String(e.to_string()))]);
                    self.close();
                    return Err(SessionError::Llm(e));
                }
            };
            self.turns_used += 1;

            let text = response.message.text();
            let tool_calls: Vec<ToolCall> = response
                .message
                .tool_calls()
                .into_iter()
                .map(|(id, name, args)| ToolCall::new(id, name, args.clone()))
                .collect();
            self.history.push(Turn::assistant(text.clone(), tool_calls.clone()));
            self.emit("ASSISTANT_TEXT_END", vec![("text", Value::String(text))]);

            if self.context_usage_fraction() > 0.8 {
                self.emit(
                    "WARNING",
                    vec![("reason", Value::String("context usage above 80%".to_string()))],
                );
            }

            if tool_calls.is_empty() {
                return Ok(());
            }

            let tool_rounds = self.history.iter().filter(|t| matches!(t, Turn::ToolResults { .. })).count() as u32;
            if self.config.max_tool_rounds_per_input > 0 && tool_rounds >= self.config.max_tool_rounds_per_input {
                self.emit("TURN_LIMIT", vec![("limit", Value::from(self.config.max_tool_rounds_per_input))]);
                return Ok(());
            }

            let results = self.dispatch_tool_calls(&tool_calls).await;
            self.history.push(Turn::tool_results(results));

            self.drain_steering();
            if self.detect_loop() {
                self.emit("LOOP_DETECTION", vec![]);
                self.history.push(Turn::steering(
                    "A repeating tool-call pattern was detected; try a different approach.".to_string(),
                ));
            }
        }
    }

    async fn build_request(&self) -> CompletionRequest {
        let provider = self.config.provider.as_deref().unwrap_or("anthropic");
        let docs = discover_project_docs(self.env.working_directory(), provider).await;
        let mut system = self.config.system_prompt.clone();
        if !docs.is_empty() {
            system = format!("{system}\n\n{docs}");
        }

        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(to_chat_messages(&self.history));

        let mut tools = self.tools.definitions();
        tools.extend(subagent_tool_definitions());

        let mut request =
            CompletionRequest::new(self.config.model.clone(), messages).with_tools(tools).with_tool_choice(ToolChoice::Auto);
        if let Some(effort) = &self.config.reasoning_effort {
            request = request.with_reasoning_effort(effort.clone());
        }
        if let Some(provider) = &self.config.provider {
            request = request.with_provider(provider.clone());
        }
        request
    }

    /// §4.K dispatch rule: sequential unless the profile advertises
    /// parallel tool calls AND the round has more than one; concurrent
    /// dispatch still assembles results in the original call order, not
    /// completion order.
    async fn dispatch_tool_calls(&self, tool_calls: &[ToolCall]) -> Vec<ToolResult> {
        if self.config.supports_parallel_tool_calls && tool_calls.len() > 1 {
            let futures = tool_calls.iter().map(|call| self.dispatch_logged(call));
            return futures::future::join_all(futures).await;
        }

        let mut results = Vec::with_capacity(tool_calls.len());
        for call in tool_calls {
            results.push(self.dispatch_logged(call).await);
        }
        results
    }

    async fn dispatch_logged(&self, call: &ToolCall) -> ToolResult {
        self.emit(
            "TOOL_CALL_START",
            vec![("id", Value::String(call.id.clone())), ("name", Value::String(call.name.clone()))],
        );
        let result = self.dispatch_one(call).await;
        self.emit(
            "TOOL_CALL_END",
            vec![("id", Value::String(call.id.clone())), ("is_error", Value::Bool(result.is_error))],
        );
        result
    }

    /// §4.L: `spawn_agent`/`wait`/`close_agent` short-circuit to the
    /// supervisor before the tool registry is ever consulted.
    async fn dispatch_one(&self, call: &ToolCall) -> ToolResult {
        match call.name.as_str() {
            "spawn_agent" => self.handle_spawn_agent(call).await,
            "wait" => self.handle_wait(call).await,
            "close_agent" => self.handle_close_agent(call).await,
            _ => match self.tools.execute(&call.name, call.args.clone(), self.env.as_ref()).await {
                Ok(content) => {
                    let truncated = truncate(&content, DEFAULT_TOOL_OUTPUT_TRUNCATE_CHARS, TruncateMode::HeadTail);
                    ToolResult::ok(call.id.clone(), truncated)
                }
                Err(e) => ToolResult::error(call.id.clone(), e.to_string()),
            },
        }
    }

    async fn handle_spawn_agent(&self, call: &ToolCall) -> ToolResult {
        let task = match call.args.get("task").and_then(Value::as_str) {
            Some(t) => t.to_string(),
            None => return ToolResult::error(call.id.clone(), "missing required argument 'task'"),
        };
        let max_turns = call.args.get("max_turns").and_then(Value::as_u64).map(|n| n as u32);

        let mut child_config = self.config.clone();
        if let Some(max_turns) = max_turns {
            child_config.max_turns = max_turns;
        }
        let child_env = self.env.clone();
        let child_llm = self.llm.clone();
        let child_tools = self.tools.clone();
        let child_bus = self.bus.clone();
        let child_depth = self.supervisor.depth() + 1;

        let future = async move {
            let mut child = AgentSession::new(child_config, child_env, child_llm, child_tools, child_bus, child_depth);
            match child.submit(task).await {
                Ok(()) => Ok(child.last_assistant_text()),
                Err(e) => Err(e.to_string()),
            }
        };

        match self.supervisor.spawn_agent(future) {
            Ok(agent_id) => ToolResult::ok(call.id.clone(), serde_json::json!({ "agent_id": agent_id }).to_string()),
            Err(e) => ToolResult::error(call.id.clone(), e.to_string()),
        }
    }

    async fn handle_wait(&self, call: &ToolCall) -> ToolResult {
        let agent_id = match call.args.get("agent_id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => return ToolResult::error(call.id.clone(), "missing required argument 'agent_id'"),
        };
        match self.supervisor.wait(&agent_id).await {
            Ok((text, is_error)) => ToolResult { tool_call_id: call.id.clone(), content: text, is_error },
            Err(e) => ToolResult::error(call.id.clone(), e.to_string()),
        }
    }

    async fn handle_close_agent(&self, call: &ToolCall) -> ToolResult {
        let agent_id = match call.args.get("agent_id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => return ToolResult::error(call.id.clone(), "missing required argument 'agent_id'"),
        };
        match self.supervisor.close_agent(&agent_id) {
            Ok(()) => ToolResult::ok(call.id.clone(), "closed"),
            Err(e) => ToolResult::error(call.id.clone(), e.to_string()),
        }
    }
}

fn subagent_tool_definitions() -> Vec<ToolDefinition> {
    use serde_json::json;
    vec![
        ToolDefinition {
            name: "spawn_agent".to_string(),
            description: "Spawn a child agent session to work a sub-task in the background.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "task": {"type": "string"},
                    "max_turns": {"type": "integer"}
                },
                "required": ["task"]
            }),
        },
        ToolDefinition {
            name: "wait".to_string(),
            description: "Block until a previously spawned sub-agent finishes and return its result.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"agent_id": {"type": "string"}},
                "required": ["agent_id"]
            }),
        },
        ToolDefinition {
            name: "close_agent".to_string(),
            description: "Forget a sub-agent handle without waiting for or aborting its work.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"agent_id": {"type": "string"}},
                "required": ["agent_id"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::LocalFilesystemEnvironment;
    use async_trait::async_trait;
    use stagegraph_llm::{CompletionResponse, ContentPart, FinishReason, Usage};
    use std::sync::Mutex as StdMutex;

    struct ScriptedLlmClient {
        responses: StdMutex<VecDeque<CompletionResponse>>,
    }

    impl ScriptedLlmClient {
        fn new(responses: Vec<CompletionResponse>) -> Self {
            Self { responses: StdMutex::new(responses.into_iter().collect()) }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlmClient {
        async fn complete(&self, _request: CompletionRequest) -> stagegraph_llm::Result<CompletionResponse> {
            let mut queue = self.responses.lock().unwrap();
            Ok(queue.pop_front().unwrap_or_else(|| text_response("done")))
        }
    }

    fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            id: "resp".to_string(),
            message: ChatMessage::assistant(vec![ContentPart::text(text)]),
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
        }
    }

    fn tool_call_response(name: &str, args: Value) -> CompletionResponse {
        CompletionResponse {
            id: "resp".to_string(),
            message: ChatMessage::assistant(vec![ContentPart::tool_call("1", name, args)]),
            finish_reason: FinishReason::ToolCalls,
            usage: Usage::default(),
        }
    }

    fn session(llm: ScriptedLlmClient) -> AgentSession {
        let dir = tempfile::tempdir().unwrap();
        let env = Arc::new(LocalFilesystemEnvironment::new(dir.path().to_path_buf()));
        let tools = ToolRegistry::with_builtins();
        AgentSession::new(SessionConfig::default(), env, Arc::new(llm), tools, EventBus::new(), 0)
    }

    #[tokio::test]
    async fn submit_with_no_tool_calls_completes_and_awaits_input() {
        let mut s = session(ScriptedLlmClient::new(vec![text_response("hello")]));
        s.submit("hi").await.unwrap();
        assert_eq!(s.state(), SessionState::AwaitingInput);
        assert_eq!(s.last_assistant_text(), "hello");
    }

    #[tokio::test]
    async fn submit_dispatches_a_tool_call_then_finishes() {
        let dir_tool_call = tool_call_response("shell", serde_json::json!({"command": "echo hi"}));
        let mut s = session(ScriptedLlmClient::new(vec![dir_tool_call, text_response("ran it")]));
        s.submit("do a thing").await.unwrap();
        assert!(s.history().iter().any(|t| matches!(t, Turn::ToolResults { .. })));
        assert_eq!(s.last_assistant_text(), "ran it");
    }

    #[tokio::test]
    async fn max_turns_cap_stops_the_loop() {
        let mut config = SessionConfig::default();
        config.max_turns = 1;
        let dir = tempfile::tempdir().unwrap();
        let env = Arc::new(LocalFilesystemEnvironment::new(dir.path().to_path_buf()));
        let llm = ScriptedLlmClient::new(vec![tool_call_response("shell", serde_json::json!({"command": "echo hi"}))]);
        let mut s = AgentSession::new(config, env, Arc::new(llm), ToolRegistry::with_builtins(), EventBus::new(), 0);

        let hit_limit = Arc::new(AtomicBool::new(false));
        let flag = hit_limit.clone();
        let _unsub = s.on_event(move |e| {
            if e.kind == "TURN_LIMIT" {
                flag.store(true, Ordering::SeqCst);
            }
        });
        s.submit("go").await.unwrap();
        assert!(hit_limit.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn parallel_dispatch_preserves_original_call_order() {
        let mut config = SessionConfig::default();
        config.supports_parallel_tool_calls = true;
        let dir = tempfile::tempdir().unwrap();
        let env = Arc::new(LocalFilesystemEnvironment::new(dir.path().to_path_buf()));
        let round = CompletionResponse {
            id: "resp".to_string(),
            message: ChatMessage::assistant(vec![
                ContentPart::tool_call("1", "shell", serde_json::json!({"command": "echo first"})),
                ContentPart::tool_call("2", "shell", serde_json::json!({"command": "echo second"})),
            ]),
            finish_reason: FinishReason::ToolCalls,
            usage: Usage::default(),
        };
        let llm = ScriptedLlmClient::new(vec![round, text_response("done")]);
        let mut s = AgentSession::new(config, env, Arc::new(llm), ToolRegistry::with_builtins(), EventBus::new(), 0);

        s.submit("run both").await.unwrap();

        let results = s
            .history()
            .iter()
            .find_map(|t| match t {
                Turn::ToolResults { results } => Some(results.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tool_call_id, "1");
        assert!(results[0].content.contains("first"));
        assert_eq!(results[1].tool_call_id, "2");
        assert!(results[1].content.contains("second"));
    }

    #[tokio::test]
    async fn max_turns_counts_both_user_and_assistant_turns() {
        let mut config = SessionConfig::default();
        config.max_turns = 2;
        let dir = tempfile::tempdir().unwrap();
        let env = Arc::new(LocalFilesystemEnvironment::new(dir.path().to_path_buf()));
        let llm = ScriptedLlmClient::new(vec![text_response("hi back")]);
        let mut s = AgentSession::new(config, env, Arc::new(llm), ToolRegistry::with_builtins(), EventBus::new(), 0);

        let hit_limit = Arc::new(AtomicBool::new(false));
        let flag = hit_limit.clone();
        let _unsub = s.on_event(move |e| {
            if e.kind == "TURN_LIMIT" {
                flag.store(true, Ordering::SeqCst);
            }
        });
        // One user turn (1) plus one assistant turn (2) exhausts a cap of
        // 2 without ever reaching a tool-call round.
        s.submit("hi").await.unwrap();
        assert!(!hit_limit.load(Ordering::SeqCst));
        assert_eq!(s.last_assistant_text(), "hi back");
    }

    #[tokio::test]
    async fn loop_detection_fires_on_a_repeating_tool_call() {
        let mut config = SessionConfig::default();
        config.loop_detection_window = 2;
        config.max_turns = 5;
        let dir = tempfile::tempdir().unwrap();
        let env = Arc::new(LocalFilesystemEnvironment::new(dir.path().to_path_buf()));
        let call = tool_call_response("shell", serde_json::json!({"command": "echo hi"}));
        let llm = ScriptedLlmClient::new(vec![call.clone(), call.clone(), call]);
        let mut s = AgentSession::new(config, env, Arc::new(llm), ToolRegistry::with_builtins(), EventBus::new(), 0);

        let detected = Arc::new(AtomicBool::new(false));
        let flag = detected.clone();
        let _unsub = s.on_event(move |e| {
            if e.kind == "LOOP_DETECTION" {
                flag.store(true, Ordering::SeqCst);
            }
        });
        s.submit("loop please").await.unwrap();
        assert!(detected.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn steer_injects_a_steering_turn_before_the_next_model_call() {
        let mut s = session(ScriptedLlmClient::new(vec![text_response("ack")]));
        s.steer("actually focus on X");
        s.submit("hi").await.unwrap();
        assert!(s.history().iter().any(|t| matches!(t, Turn::Steering { .. })));
    }

    #[tokio::test]
    async fn spawn_wait_close_round_trip_through_the_supervisor() {
        let dir = tempfile::tempdir().unwrap();
        let env = Arc::new(LocalFilesystemEnvironment::new(dir.path().to_path_buf()));
        let spawn_call = tool_call_response("spawn_agent", serde_json::json!({"task": "sub task"}));
        let llm = ScriptedLlmClient::new(vec![spawn_call, text_response("spawned")]);
        let mut s = AgentSession::new(SessionConfig::default(), env, Arc::new(llm), ToolRegistry::with_builtins(), EventBus::new(), 0);
        s.submit("go").await.unwrap();

        let agent_id = s
            .history()
            .iter()
            .find_map(|t| match t {
                Turn::ToolResults { results } => {
                    let v: Value = serde_json::from_str(&results[0].content).ok()?;
                    v.get("agent_id").and_then(Value::as_str).map(str::to_string)
                }
                _ => None,
            })
            .unwrap();
        let (text, is_error) = s.supervisor.wait(&agent_id).await.unwrap();
        assert!(!is_error);
        assert!(!text.is_empty());
        s.supervisor.close_agent(&agent_id).unwrap();
    }
}
