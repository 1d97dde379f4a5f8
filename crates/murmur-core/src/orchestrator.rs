//! Orchestration service.
//!
//! Sits between the inbound router and the loops. For each addressed
//! message it seals secret material, assembles conversation context,
//! picks agent vs task mode, applies the conversation context to tools,
//! drives the loop (with streaming), and renders the final reply.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use murmur_llm::provider::ChatProvider;
use murmur_types::config::Config;
use murmur_types::event::{MessageKind, OutboundMessage};
use murmur_types::task::{TaskState, TaskStatus};

use crate::agent::loop_core::{
    AgentLoopOptions, AgentLoopResult, LoopStatus, RegistryToolHandler,
};
use crate::agent::runs::{RunRegistry, run_key};
use crate::agent::stream::{EmitFn, StreamState};
use crate::approval::ApprovalService;
use crate::bus::MessageBus;
use crate::session::SessionRecorder;
use crate::stores::TaskStore;
use crate::task_loop::{NodeOutcome, TaskNode, run_task_loop};
use crate::tools::registry::{RuntimeContext, ToolContext, ToolRegistry};
use crate::vault::{SecretVault, resolve_text};

/// Failure reasons are trimmed to this length in user-facing notices.
const MAX_REASON_CHARS: usize = 180;

/// History assembled into the reference block.
const HISTORY_MESSAGES: usize = 10;
const HISTORY_MAX_AGE_MS: i64 = 6 * 60 * 60 * 1_000;

/// Execution mode for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Agent,
    Task,
}

/// Pick the execution mode from the request text: task mode when the
/// text carries approval/wait/workflow keywords or lists three or more
/// numbered/bulleted items.
pub fn pick_mode(text: &str) -> Mode {
    const TASK_KEYWORDS: &[&str] = &[
        "승인", "approval", "approve", "기다려", "wait for", "워크플로", "workflow", "단계별",
    ];
    let lower = text.to_lowercase();
    if TASK_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return Mode::Task;
    }
    if numbered_items(text).len() >= 3 {
        return Mode::Task;
    }
    Mode::Agent
}

/// Extract numbered / bulleted list items from the text.
pub fn numbered_items(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            let body = trimmed
                .strip_prefix(|c: char| c.is_ascii_digit())
                .map(|rest| rest.trim_start_matches(|c: char| c.is_ascii_digit()))
                .and_then(|rest| rest.strip_prefix(['.', ')']))
                .or_else(|| trimmed.strip_prefix(['-', '*', '•']))?;
            let body = body.trim();
            (!body.is_empty()).then(|| body.to_owned())
        })
        .collect()
}

/// Compose the loop objective from the request and its context blocks.
/// Reference sections are omitted when empty.
pub fn compose_objective(request: &str, history: &[String], thread_nearby: &[String]) -> String {
    let mut blocks = vec![format!("[CURRENT_REQUEST]\n{request}")];
    if !history.is_empty() {
        blocks.push(format!("[REFERENCE_RECENT_CONTEXT]\n{}", history.join("\n")));
    }
    if !thread_nearby.is_empty() {
        blocks.push(format!("[THREAD_NEARBY_CONTEXT]\n{}", thread_nearby.join("\n")));
    }
    blocks.join("\n\n")
}

/// The fixed failure notice.
pub fn failure_notice(alias: &str, reason: &str) -> String {
    let reason: String = reason.chars().take(MAX_REASON_CHARS).collect();
    format!("🔴 {alias} 작업 처리에 실패했습니다. ({reason})")
}

/// An addressed inbound request, ready to orchestrate.
#[derive(Debug, Clone)]
pub struct OrchestratorRequest {
    /// Provider the message arrived on.
    pub provider: String,
    /// Chat it arrived in.
    pub chat_id: String,
    /// Thread, when any.
    pub thread_id: Option<String>,
    /// Sender id.
    pub sender_id: String,
    /// Agent alias addressed.
    pub alias: String,
    /// Message text.
    pub text: String,
    /// Platform-native id of the triggering message.
    pub trigger_message_id: Option<String>,
    /// Nearby messages sharing the thread, oldest first.
    pub thread_context: Vec<String>,
    /// Set when the cron scheduler (not a person) drives this request;
    /// cron-blocked tools are refused for the whole run.
    pub from_cron: bool,
}

/// What the router sends back to the chat.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorReply {
    /// Reply text; empty means nothing to send.
    pub reply: String,
    /// Suppress the final reply (stream already delivered it).
    pub suppress_reply: bool,
    /// Whether streaming chunks were emitted.
    pub streamed: bool,
    /// Failure reason code, when the run failed.
    pub error: Option<String>,
}

/// Seam the router drives; implemented by [`Orchestrator`] and mocked in
/// router tests.
#[async_trait]
pub trait Orchestrate: Send + Sync {
    /// Handle one addressed request end to end.
    async fn handle(&self, request: OrchestratorRequest) -> OrchestratorReply;
}

/// The orchestration service.
pub struct Orchestrator {
    config: Config,
    bus: Arc<MessageBus>,
    vault: Arc<dyn SecretVault>,
    recorder: Arc<SessionRecorder>,
    tools: Arc<ToolRegistry>,
    approvals: Arc<ApprovalService>,
    task_store: Arc<dyn TaskStore>,
    runs: Arc<RunRegistry>,
    providers: HashMap<String, Arc<dyn ChatProvider>>,
}

impl Orchestrator {
    /// Wire the orchestrator. `providers` maps provider ids to adapters.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        bus: Arc<MessageBus>,
        vault: Arc<dyn SecretVault>,
        recorder: Arc<SessionRecorder>,
        tools: Arc<ToolRegistry>,
        approvals: Arc<ApprovalService>,
        task_store: Arc<dyn TaskStore>,
        runs: Arc<RunRegistry>,
        providers: HashMap<String, Arc<dyn ChatProvider>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            bus,
            vault,
            recorder,
            tools,
            approvals,
            task_store,
            runs,
            providers,
        })
    }

    /// The run registry, for `/stop` and shutdown.
    pub fn runs(&self) -> &Arc<RunRegistry> {
        &self.runs
    }

    /// Handle one addressed request end to end.
    pub async fn handle(&self, request: OrchestratorRequest) -> OrchestratorReply {
        // 1. Secret pre-scan: unresolved material blocks execution.
        let (resolved_text, scan) = resolve_text(self.vault.as_ref(), &request.text).await;
        if !scan.is_clean() {
            warn!(chat_id = %request.chat_id, "secret resolution blocked request");
            return OrchestratorReply {
                reply: scan.notice(),
                error: Some("secret_resolution".into()),
                ..Default::default()
            };
        }

        // 2. Context assembly happens before the new message is recorded.
        let history = self
            .recorder
            .get_history(
                &request.provider,
                &request.chat_id,
                request.thread_id.as_deref(),
                &request.alias,
                HISTORY_MESSAGES,
                Some(HISTORY_MAX_AGE_MS),
            )
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>();

        let _ = self
            .recorder
            .record_user(
                &request.provider,
                &request.chat_id,
                request.thread_id.as_deref(),
                &request.alias,
                &resolved_text,
            )
            .await;

        let objective = compose_objective(&resolved_text, &history, &request.thread_context);

        // 3. Conversation context flows into the tools before the loop.
        self.tools
            .apply_runtime_context(&RuntimeContext {
                channel: request.provider.clone(),
                chat_id: request.chat_id.clone(),
                reply_to: request.trigger_message_id.clone(),
            })
            .await;

        let mode = pick_mode(&resolved_text);
        info!(chat_id = %request.chat_id, mode = ?mode, "orchestrating request");

        let reply = match mode {
            Mode::Agent => self.run_agent_mode(&request, &objective).await,
            Mode::Task => self.run_task_mode(&request, &resolved_text).await,
        };

        if !reply.reply.is_empty() {
            let _ = self
                .recorder
                .record_assistant(
                    &request.provider,
                    &request.chat_id,
                    request.thread_id.as_deref(),
                    &request.alias,
                    &reply.reply,
                )
                .await;
        }
        reply
    }

    fn primary_provider(&self) -> Option<Arc<dyn ChatProvider>> {
        self.providers
            .get(&self.config.loops.executor_provider)
            .cloned()
    }

    fn fallback_provider(&self) -> Option<Arc<dyn ChatProvider>> {
        self.config
            .loops
            .fallback_provider
            .as_ref()
            .and_then(|id| self.providers.get(id))
            .cloned()
    }

    fn stream_state(&self, request: &OrchestratorRequest) -> Arc<StreamState> {
        let bus = self.bus.clone();
        let provider = request.provider.clone();
        let chat_id = request.chat_id.clone();
        let trigger = request.trigger_message_id.clone();
        let alias = request.alias.clone();
        let emit: EmitFn = Arc::new(move |text: String| {
            let bus = bus.clone();
            let provider = provider.clone();
            let chat_id = chat_id.clone();
            let trigger = trigger.clone();
            let alias = alias.clone();
            Box::pin(async move {
                let mut msg =
                    OutboundMessage::new(provider, chat_id, text, MessageKind::AgentStream);
                msg.metadata.trigger_message_id = trigger;
                msg.metadata.agent_alias = Some(alias);
                bus.publish_outbound(msg);
            })
        });
        StreamState::new(self.config.streaming.clone(), emit)
    }

    fn loop_options(
        &self,
        request: &OrchestratorRequest,
        stream: &Arc<StreamState>,
        abort: tokio_util::sync::CancellationToken,
        tools: Vec<serde_json::Value>,
        quiet: Arc<std::sync::atomic::AtomicBool>,
    ) -> AgentLoopOptions {
        let mut options = AgentLoopOptions::new(request.alias.clone(), self.config.loops.agent_max_turns);
        options.tools = tools;
        options.tool_handler = Some(Arc::new(RegistryToolHandler::new(self.tools.clone())));
        options.tool_context = ToolContext {
            channel: Some(request.provider.clone()),
            chat_id: Some(request.chat_id.clone()),
            sender_id: Some(request.sender_id.clone()),
            from_cron: request.from_cron,
            abort: Some(abort.clone()),
            quiet,
            ..Default::default()
        };
        options.abort = Some(abort);
        let stream = stream.clone();
        options.on_stream = Some(Arc::new(move |chunk: &str| stream.push(chunk)));
        options
    }

    async fn run_agent_mode(
        &self,
        request: &OrchestratorRequest,
        objective: &str,
    ) -> OrchestratorReply {
        let Some(provider) = self.primary_provider() else {
            return OrchestratorReply {
                reply: failure_notice(&request.alias, "executor_args_invalid"),
                error: Some("executor_args_invalid".into()),
                ..Default::default()
            };
        };

        let key = run_key(&request.provider, &request.chat_id, &request.alias);
        let handle = self.runs.begin(&key);
        let stream = self.stream_state(request);
        let tools = self.tools.get_definitions().await;
        let quiet = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let options = self.loop_options(
            request,
            &stream,
            handle.token.clone(),
            tools.clone(),
            quiet.clone(),
        );
        let mut result = crate::agent::loop_core::run_agent_loop(
            provider.as_ref(),
            objective,
            options,
        )
        .await;

        // One-shot fallback when the primary provider itself failed.
        if result.state.status == LoopStatus::Failed
            && result
                .state
                .termination_reason
                .as_deref()
                .is_some_and(|r| r.starts_with("provider_error") || r.contains("transport"))
            && let Some(fallback) = self.fallback_provider()
        {
            info!(chat_id = %request.chat_id, "primary provider failed, trying fallback");
            let options = self.loop_options(
                request,
                &stream,
                handle.token.clone(),
                tools,
                quiet.clone(),
            );
            result = crate::agent::loop_core::run_agent_loop(
                fallback.as_ref(),
                objective,
                options,
            )
            .await;
        }

        stream.close().await;
        self.runs.finish(&handle);
        let quiet = quiet.load(std::sync::atomic::Ordering::Acquire);
        self.reply_from_result(request, result, &stream, quiet)
    }

    fn reply_from_result(
        &self,
        request: &OrchestratorRequest,
        result: AgentLoopResult,
        stream: &Arc<StreamState>,
        quiet: bool,
    ) -> OrchestratorReply {
        let streamed = stream.visibly_emitted();
        match result.state.status {
            LoopStatus::Completed | LoopStatus::MaxTurnsReached => {
                if quiet {
                    // A tool already delivered its own outbound; stay silent.
                    OrchestratorReply {
                        reply: result.final_content,
                        suppress_reply: true,
                        streamed,
                        error: None,
                    }
                } else if result.final_content.is_empty() {
                    OrchestratorReply {
                        reply: failure_notice(&request.alias, "empty_output"),
                        streamed,
                        error: Some("empty_output".into()),
                        ..Default::default()
                    }
                } else {
                    OrchestratorReply {
                        reply: result.final_content,
                        suppress_reply: stream.suppress_final(),
                        streamed,
                        error: None,
                    }
                }
            }
            LoopStatus::Stopped => OrchestratorReply {
                reply: String::new(),
                suppress_reply: true,
                streamed,
                error: Some("stopped".into()),
            },
            LoopStatus::Failed | LoopStatus::Running => {
                let reason = result
                    .state
                    .termination_reason
                    .unwrap_or_else(|| "unknown".into());
                let reply = if result.final_content.is_empty() {
                    failure_notice(&request.alias, &reason)
                } else {
                    result.final_content
                };
                OrchestratorReply {
                    reply,
                    streamed,
                    error: Some(reason),
                    ..Default::default()
                }
            }
        }
    }

    async fn run_task_mode(
        &self,
        request: &OrchestratorRequest,
        text: &str,
    ) -> OrchestratorReply {
        let Some(provider) = self.primary_provider() else {
            return OrchestratorReply {
                reply: failure_notice(&request.alias, "executor_args_invalid"),
                error: Some("executor_args_invalid".into()),
                ..Default::default()
            };
        };

        let items = {
            let items = numbered_items(text);
            if items.is_empty() {
                vec![text.to_owned()]
            } else {
                items
            }
        };

        let key = run_key(&request.provider, &request.chat_id, &request.alias);
        let handle = self.runs.begin(&key);
        let stream = self.stream_state(request);
        let tools = self.tools.get_definitions().await;
        let quiet = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let nodes: Vec<Arc<dyn TaskNode>> = items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                Arc::new(AgentTurnNode {
                    label: format!("step-{}", index + 1),
                    objective: item.clone(),
                    provider: provider.clone(),
                    options_factory: {
                        let orchestrator_tools = tools.clone();
                        let request = request.clone();
                        let stream = stream.clone();
                        let abort = handle.token.clone();
                        let quiet = quiet.clone();
                        let this = self_ref(self);
                        Arc::new(move || {
                            this.loop_options(
                                &request,
                                &stream,
                                abort.clone(),
                                orchestrator_tools.clone(),
                                quiet.clone(),
                            )
                        })
                    },
                    approvals: self.approvals.clone(),
                    provider_name: request.provider.clone(),
                    chat_id: request.chat_id.clone(),
                }) as Arc<dyn TaskNode>
            })
            .collect();

        let task_id = format!("task-{}", uuid::Uuid::new_v4());
        let outcome = run_task_loop(
            self.task_store.as_ref(),
            &task_id,
            &items.first().cloned().unwrap_or_default(),
            &nodes,
            self.config.loops.task_max_turns,
            0,
        )
        .await;

        stream.close().await;
        self.runs.finish(&handle);
        let quiet = quiet.load(std::sync::atomic::Ordering::Acquire);

        match outcome {
            Ok(task) => self.reply_from_task(request, &task, stream.visibly_emitted(), quiet),
            Err(e) => OrchestratorReply {
                reply: failure_notice(&request.alias, &e.to_string()),
                error: Some(e.to_string()),
                ..Default::default()
            },
        }
    }

    fn reply_from_task(
        &self,
        request: &OrchestratorRequest,
        task: &TaskState,
        streamed: bool,
        quiet: bool,
    ) -> OrchestratorReply {
        match task.status {
            TaskStatus::Completed => {
                let last = task
                    .memory
                    .iter()
                    .filter_map(|(k, v)| {
                        let index: usize = k
                            .strip_prefix("step_")?
                            .strip_suffix("_result")?
                            .parse()
                            .ok()?;
                        Some((index, v))
                    })
                    .max_by_key(|(index, _)| *index)
                    .and_then(|(_, v)| v.as_str().map(String::from))
                    .unwrap_or_else(|| "작업을 완료했습니다.".into());
                if quiet {
                    // A tool already delivered its own outbound; stay silent.
                    OrchestratorReply {
                        reply: last,
                        suppress_reply: true,
                        streamed,
                        error: None,
                    }
                } else {
                    OrchestratorReply {
                        reply: last,
                        streamed,
                        ..Default::default()
                    }
                }
            }
            TaskStatus::WaitingApproval => OrchestratorReply {
                reply: format!(
                    "⏳ 승인 대기 중입니다. ({} / {})",
                    task.current_step, task.task_id
                ),
                streamed,
                ..Default::default()
            },
            TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::MaxTurnsReached => {
                OrchestratorReply {
                    reply: failure_notice(&request.alias, &task.exit_reason),
                    streamed,
                    error: Some(task.exit_reason.clone()),
                    ..Default::default()
                }
            }
            TaskStatus::Running => OrchestratorReply {
                reply: String::new(),
                streamed,
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl Orchestrate for Orchestrator {
    async fn handle(&self, request: OrchestratorRequest) -> OrchestratorReply {
        Orchestrator::handle(self, request).await
    }
}

fn self_ref(orchestrator: &Orchestrator) -> Arc<OrchestratorSnapshot> {
    Arc::new(OrchestratorSnapshot {
        config: orchestrator.config.clone(),
        tools: orchestrator.tools.clone(),
    })
}

/// Loop-option factory captured by task nodes; node closures are
/// `'static` and cannot borrow the orchestrator itself.
struct OrchestratorSnapshot {
    config: Config,
    tools: Arc<ToolRegistry>,
}

impl OrchestratorSnapshot {
    fn loop_options(
        &self,
        request: &OrchestratorRequest,
        stream: &Arc<StreamState>,
        abort: tokio_util::sync::CancellationToken,
        tools: Vec<serde_json::Value>,
        quiet: Arc<std::sync::atomic::AtomicBool>,
    ) -> AgentLoopOptions {
        let mut options =
            AgentLoopOptions::new(request.alias.clone(), self.config.loops.agent_max_turns);
        options.tools = tools;
        options.tool_handler = Some(Arc::new(RegistryToolHandler::new(self.tools.clone())));
        options.tool_context = ToolContext {
            channel: Some(request.provider.clone()),
            chat_id: Some(request.chat_id.clone()),
            sender_id: Some(request.sender_id.clone()),
            from_cron: request.from_cron,
            abort: Some(abort.clone()),
            quiet,
            ..Default::default()
        };
        options.abort = Some(abort);
        let stream = stream.clone();
        options.on_stream = Some(Arc::new(move |chunk: &str| stream.push(chunk)));
        options
    }
}

/// Task node driving one agent turn for one workflow item.
struct AgentTurnNode {
    label: String,
    objective: String,
    provider: Arc<dyn ChatProvider>,
    options_factory: Arc<dyn Fn() -> AgentLoopOptions + Send + Sync>,
    approvals: Arc<ApprovalService>,
    provider_name: String,
    chat_id: String,
}

#[async_trait]
impl TaskNode for AgentTurnNode {
    fn label(&self) -> &str {
        &self.label
    }

    async fn run(&self, state: &TaskState) -> Result<NodeOutcome, String> {
        let options = (self.options_factory)();
        let result = crate::agent::loop_core::run_agent_loop(
            self.provider.as_ref(),
            &self.objective,
            options,
        )
        .await;

        if result.state.status == LoopStatus::Failed {
            return Err(result
                .state
                .termination_reason
                .unwrap_or_else(|| "agent_turn_failed".into()));
        }

        let mut patch = std::collections::HashMap::new();
        patch.insert(
            format!("step_{}_result", state.step_index()),
            serde_json::json!(result.final_content),
        );

        // A gated tool left a pending request: suspend until it resolves.
        if self
            .approvals
            .has_pending(&self.provider_name, &self.chat_id)
            .await
        {
            return Ok(NodeOutcome {
                memory_patch: Some(patch),
                status: Some(TaskStatus::WaitingApproval),
                ..Default::default()
            });
        }

        Ok(NodeOutcome {
            memory_patch: Some(patch),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_keywords_select_task() {
        assert_eq!(pick_mode("배포 승인 받고 진행해줘"), Mode::Task);
        assert_eq!(pick_mode("run the workflow for release"), Mode::Task);
        assert_eq!(pick_mode("what is the weather"), Mode::Agent);
    }

    #[test]
    fn three_items_select_task() {
        let two = "1. build\n2. test";
        assert_eq!(pick_mode(two), Mode::Agent);

        let three = "1. build\n2. test\n3. deploy";
        assert_eq!(pick_mode(three), Mode::Task);

        let bullets = "- one\n- two\n- three";
        assert_eq!(pick_mode(bullets), Mode::Task);
    }

    #[test]
    fn numbered_item_extraction() {
        let items = numbered_items("plan:\n1. build it\n2) test it\n- ship it\nnot a list line");
        assert_eq!(items, vec!["build it", "test it", "ship it"]);
        assert!(numbered_items("no lists here").is_empty());
    }

    #[test]
    fn objective_composition_omits_empty_sections() {
        let bare = compose_objective("do the thing", &[], &[]);
        assert_eq!(bare, "[CURRENT_REQUEST]\ndo the thing");
        assert!(!bare.contains("[REFERENCE_RECENT_CONTEXT]"));

        let full = compose_objective(
            "do the thing",
            &["user: earlier".into()],
            &["thread msg".into()],
        );
        assert!(full.starts_with("[CURRENT_REQUEST]\ndo the thing"));
        assert!(full.contains("[REFERENCE_RECENT_CONTEXT]\nuser: earlier"));
        assert!(full.contains("[THREAD_NEARBY_CONTEXT]\nthread msg"));
    }

    #[test]
    fn failure_notice_trims_reason() {
        let notice = failure_notice("claude", "executor_args_invalid");
        assert_eq!(
            notice,
            "🔴 claude 작업 처리에 실패했습니다. (executor_args_invalid)"
        );

        let long = "x".repeat(400);
        let notice = failure_notice("claude", &long);
        assert!(notice.chars().count() < 250);
    }
}
