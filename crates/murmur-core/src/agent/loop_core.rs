//! The bounded agent turn loop.
//!
//! One worker per [`run_agent_loop`] call:
//!
//! ```text
//! objective
//!   |
//!   v
//! provider.chat (streaming chunks -> on_stream)
//!   |
//!   +-- tool calls? --> repeat-guard --> handler --> transcript
//!   |                                      |   prepended to next message
//!   |                                      +--> next turn
//!   v
//! text response -> check_should_continue -> completed | next turn
//! ```
//!
//! The loop never blocks on human input: gated tools enqueue an approval
//! request and return a placeholder transcript. An external abort stops
//! the loop between turns and aborts the in-flight provider call.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use murmur_llm::provider::ChatProvider;
use murmur_llm::types::{ChatMessage, ChatRequest, ChatResponse, StreamSink, ToolCall};
use murmur_llm::ProviderError;

use crate::tools::registry::{ToolContext, ToolRegistry, transcript_line};

use super::tool_calls::parse_tool_calls;

/// Terminal status of an agent loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Running,
    Completed,
    Stopped,
    Failed,
    MaxTurnsReached,
}

/// Mutable state owned by the loop worker.
#[derive(Debug, Clone)]
pub struct AgentLoopState {
    /// Unique id of this invocation.
    pub loop_id: String,
    /// Alias of the agent running the loop.
    pub agent_id: String,
    /// The objective the loop was started with.
    pub objective: String,
    /// Turns consumed so far.
    pub current_turn: u32,
    /// Turn budget.
    pub max_turns: u32,
    /// Whether the continue-check still allows another turn.
    pub check_should_continue: bool,
    /// Loop status.
    pub status: LoopStatus,
    /// Why the loop terminated, when not completed.
    pub termination_reason: Option<String>,
}

/// Result of a loop run.
#[derive(Debug, Clone)]
pub struct AgentLoopResult {
    /// Final loop state.
    pub state: AgentLoopState,
    /// The last text the model produced (empty when none).
    pub final_content: String,
}

/// Decides whether the loop takes another turn after a text response.
pub type CheckContinue = Arc<dyn Fn(&AgentLoopState, &ChatResponse) -> bool + Send + Sync>;

/// Executes a batch of tool calls and renders their transcript.
#[async_trait]
pub trait ToolCallHandler: Send + Sync {
    /// Execute every call and return the combined transcript text.
    async fn handle(&self, calls: &[ToolCall], ctx: &ToolContext) -> String;
}

/// The standard handler: dispatch each call through the tool registry.
pub struct RegistryToolHandler {
    registry: Arc<ToolRegistry>,
}

impl RegistryToolHandler {
    /// Create a handler over the given registry.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ToolCallHandler for RegistryToolHandler {
    async fn handle(&self, calls: &[ToolCall], ctx: &ToolContext) -> String {
        let mut lines = Vec::with_capacity(calls.len());
        for call in calls {
            let name = call.function.name.as_str();
            let result = self.registry.execute(name, call.arguments(), ctx).await;
            lines.push(transcript_line(name, &result));
        }
        lines.join("\n")
    }
}

/// Options for one [`run_agent_loop`] invocation.
pub struct AgentLoopOptions {
    /// Alias of the agent running the loop.
    pub agent_id: String,
    /// Turn budget.
    pub max_turns: u32,
    /// Context messages placed before the objective (history blocks,
    /// system prompt). May be empty.
    pub context_messages: Vec<ChatMessage>,
    /// Tool definitions handed to the provider.
    pub tools: Vec<serde_json::Value>,
    /// Tool-call handler; absent means tool calls terminate the loop.
    pub tool_handler: Option<Arc<dyn ToolCallHandler>>,
    /// Execution context for tools.
    pub tool_context: ToolContext,
    /// Continue-check evaluated after every text response. Absent means
    /// a text response completes the loop.
    pub check_should_continue: Option<CheckContinue>,
    /// Streaming chunk sink.
    pub on_stream: Option<StreamSink>,
    /// External abort signal.
    pub abort: Option<CancellationToken>,
}

impl AgentLoopOptions {
    /// Options with a turn budget and everything else off.
    pub fn new(agent_id: impl Into<String>, max_turns: u32) -> Self {
        Self {
            agent_id: agent_id.into(),
            max_turns,
            context_messages: Vec::new(),
            tools: Vec::new(),
            tool_handler: None,
            tool_context: ToolContext::default(),
            check_should_continue: None,
            on_stream: None,
            abort: None,
        }
    }
}

/// Exact-match signature of one turn's tool calls for the repeat-guard.
fn calls_signature(calls: &[ToolCall]) -> String {
    calls
        .iter()
        .map(|c| format!("{}({})", c.function.name, c.function.arguments))
        .collect::<Vec<_>>()
        .join(";")
}

/// Run the bounded turn loop against `provider`.
pub async fn run_agent_loop(
    provider: &dyn ChatProvider,
    objective: &str,
    options: AgentLoopOptions,
) -> AgentLoopResult {
    let mut state = AgentLoopState {
        loop_id: format!("loop-{}", uuid::Uuid::new_v4()),
        agent_id: options.agent_id.clone(),
        objective: objective.to_owned(),
        current_turn: 0,
        max_turns: options.max_turns.max(1),
        check_should_continue: true,
        status: LoopStatus::Running,
        termination_reason: None,
    };
    let mut final_content = String::new();
    let mut current_message = objective.to_owned();
    let mut previous_signature: Option<String> = None;

    info!(loop_id = %state.loop_id, agent = %state.agent_id, "agent loop started");

    while state.current_turn < state.max_turns && state.check_should_continue {
        if let Some(abort) = &options.abort
            && abort.is_cancelled()
        {
            state.status = LoopStatus::Stopped;
            state.termination_reason = Some("aborted".into());
            break;
        }

        state.current_turn += 1;
        debug!(loop_id = %state.loop_id, turn = state.current_turn, "turn start");

        let mut messages = options.context_messages.clone();
        messages.push(ChatMessage::user(current_message.clone()));

        let request = ChatRequest {
            messages,
            tools: options.tools.clone(),
            model: None,
            max_tokens: None,
            temperature: None,
            on_stream: options.on_stream.clone(),
            abort: options.abort.clone(),
        };

        let response = match provider.chat(request).await {
            Ok(response) => response,
            Err(ProviderError::Aborted) => {
                state.status = LoopStatus::Stopped;
                state.termination_reason = Some("aborted".into());
                break;
            }
            Err(e) => {
                warn!(loop_id = %state.loop_id, error = %e, "provider call failed");
                state.status = LoopStatus::Failed;
                state.termination_reason = Some(e.to_string());
                break;
            }
        };

        // Structured calls win; otherwise try to recover them from text.
        let tool_calls = if response.tool_calls.is_empty() {
            response
                .content
                .as_deref()
                .map(parse_tool_calls)
                .unwrap_or_default()
        } else {
            response.tool_calls.clone()
        };

        if !tool_calls.is_empty() {
            let signature = calls_signature(&tool_calls);
            if previous_signature.as_deref() == Some(signature.as_str()) {
                let names: Vec<&str> =
                    tool_calls.iter().map(|c| c.function.name.as_str()).collect();
                warn!(loop_id = %state.loop_id, tools = ?names, "repeated tool calls");
                state.status = LoopStatus::Failed;
                state.termination_reason = Some("repeated_tool_calls".into());
                final_content = format!(
                    "동일한 도구 호출이 연속으로 반복되어 중단했습니다: {}",
                    names.join(", ")
                );
                break;
            }
            previous_signature = Some(signature);

            let Some(handler) = options.tool_handler.as_ref() else {
                state.status = LoopStatus::Failed;
                state.termination_reason =
                    Some("tool_calls_requested_but_handler_missing".into());
                break;
            };

            let transcript = handler.handle(&tool_calls, &options.tool_context).await;
            current_message = format!("{transcript}\n\n{current_message}");
            continue;
        }

        previous_signature = None;
        final_content = response.content.clone().unwrap_or_default();

        state.check_should_continue = options
            .check_should_continue
            .as_ref()
            .map(|check| check(&state, &response))
            .unwrap_or(false);

        if !state.check_should_continue {
            state.status = LoopStatus::Completed;
        }
    }

    if state.current_turn >= state.max_turns && state.status == LoopStatus::Running {
        state.status = LoopStatus::MaxTurnsReached;
        state.termination_reason = Some("max_turns_reached".into());
    }

    info!(
        loop_id = %state.loop_id,
        turns = state.current_turn,
        status = ?state.status,
        "agent loop finished"
    );
    AgentLoopResult {
        state,
        final_content,
    }
}
