//! Approval request lifecycle.
//!
//! Tools with side effects register an [`ApprovalRequest`] here and return
//! a placeholder; the request is resolved by a human decision arriving as
//! a text reply (decision token, optionally disambiguated with
//! `request_id:<id>`) or a platform reaction on the bot message that
//! carries the id. On approval the stored call is replayed through the
//! tool registry and an `approval_result` is published to the chat.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use murmur_types::approval::{ApprovalRequest, ApprovalStatus, Decision};
use murmur_types::event::{MessageKind, OutboundMessage};

use crate::bus::MessageBus;
use crate::dedupe::SeenSet;
use crate::tools::registry::{ApprovalSink, ToolContext, ToolRegistry};

/// Tool results in `approval_result` messages are truncated to this length.
const MAX_RESULT_CHARS: usize = 500;

/// Reaction-decision fingerprints are remembered this long.
const REACTION_SEEN_TTL_MS: i64 = 10 * 60 * 1_000;

fn request_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"request_id:\s*(req-[0-9a-f-]+)").expect("static regex"))
}

fn embedded_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"req-[0-9a-f]{8}-[0-9a-f-]+").expect("static regex"))
}

/// Parse a decision token out of reply text.
///
/// Emoji and Korean tokens match anywhere; bare English words only at
/// word boundaries so ordinary prose does not trip the parser.
pub fn parse_decision(text: &str) -> Option<Decision> {
    let lower = text.to_lowercase();
    let word = |w: &str| {
        lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|token| token == w)
    };

    if lower.contains('✅') || lower.contains("승인") || word("yes") || word("approve") {
        return Some(Decision::Approve);
    }
    if lower.contains('❌') || lower.contains("거절") || word("no") || word("deny") {
        return Some(Decision::Deny);
    }
    if lower.contains("⏸️") || lower.contains("보류") || word("later") || word("defer") {
        return Some(Decision::Defer);
    }
    if lower.contains('⛔') || lower.contains("취소") || word("stop") || word("cancel") {
        return Some(Decision::Cancel);
    }
    None
}

/// Map a platform reaction name to a decision. Slack-only table.
pub fn reaction_decision(reaction: &str) -> Option<Decision> {
    match reaction {
        "white_check_mark" | "heavy_check_mark" | "+1" | "thumbsup" => Some(Decision::Approve),
        "x" | "-1" | "thumbsdown" => Some(Decision::Deny),
        "double_vertical_bar" | "pause_button" => Some(Decision::Defer),
        "no_entry" | "octagonal_sign" => Some(Decision::Cancel),
        _ => None,
    }
}

/// The approval request lifecycle service.
pub struct ApprovalService {
    bus: Arc<MessageBus>,
    requests: RwLock<HashMap<String, ApprovalRequest>>,
    tools: OnceLock<Arc<ToolRegistry>>,
    reaction_seen: SeenSet,
}

impl ApprovalService {
    /// Create the service. Attach the tool registry afterwards with
    /// [`attach_tools`](Self::attach_tools) (two-phase: the registry needs
    /// this service as its sink).
    pub fn new(bus: Arc<MessageBus>) -> Arc<Self> {
        Arc::new(Self {
            bus,
            requests: RwLock::new(HashMap::new()),
            tools: OnceLock::new(),
            reaction_seen: SeenSet::new(REACTION_SEEN_TTL_MS, 2_048),
        })
    }

    /// Second construction phase: give the service the registry it
    /// replays approved calls through.
    pub fn attach_tools(&self, tools: Arc<ToolRegistry>) {
        let _ = self.tools.set(tools);
    }

    /// Snapshot of a request, for tests and the status command.
    pub async fn get(&self, request_id: &str) -> Option<ApprovalRequest> {
        self.requests.read().await.get(request_id).cloned()
    }

    /// Pending requests for one chat, oldest first.
    pub async fn pending_for_chat(&self, provider: &str, chat_id: &str) -> Vec<ApprovalRequest> {
        let requests = self.requests.read().await;
        let mut pending: Vec<ApprovalRequest> = requests
            .values()
            .filter(|r| {
                r.status == ApprovalStatus::Pending
                    && r.context.channel == provider
                    && r.context.chat_id == chat_id
            })
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    /// Whether any request is pending for this chat.
    pub async fn has_pending(&self, provider: &str, chat_id: &str) -> bool {
        !self.pending_for_chat(provider, chat_id).await.is_empty()
    }

    /// Try to consume an inbound message as an approval decision.
    ///
    /// Returns `true` when the message resolved (or tried to clarify) a
    /// request; `false` lets the router pipeline continue.
    pub async fn handle_reply(
        &self,
        provider: &str,
        chat_id: &str,
        text: &str,
    ) -> bool {
        let explicit_id = request_id_pattern()
            .captures(text)
            .map(|c| c[1].to_string());

        let target = match &explicit_id {
            Some(id) => self.requests.read().await.get(id).cloned(),
            None => self
                .pending_for_chat(provider, chat_id)
                .await
                .into_iter()
                .next(),
        };

        let Some(request) = target else {
            return false;
        };

        let decision = parse_decision(text);
        match (&explicit_id, decision) {
            // Explicit id with unclear intent: ask for clarification.
            (Some(_), None) => {
                self.resolve(&request.request_id, Decision::Clarify).await;
                true
            }
            (_, Some(decision)) => {
                self.resolve(&request.request_id, decision).await;
                true
            }
            // No id, no token: not an approval reply.
            (None, None) => false,
        }
    }

    /// Handle platform-native reactions on a bot message whose text
    /// carries a request id. Duplicate deliveries are dropped via a
    /// fingerprint over `(provider, chat_id, request_id, decision,
    /// sorted reactions)`.
    pub async fn handle_reaction(
        &self,
        provider: &str,
        chat_id: &str,
        bot_message_text: &str,
        reactions: &[String],
    ) -> bool {
        let Some(request_id) = embedded_id_pattern()
            .find(bot_message_text)
            .map(|m| m.as_str().to_string())
        else {
            return false;
        };

        let Some(decision) = reactions.iter().find_map(|r| reaction_decision(r)) else {
            return false;
        };

        let mut sorted = reactions.to_vec();
        sorted.sort();
        let fingerprint = format!(
            "{provider}:{chat_id}:{request_id}:{decision:?}:{}",
            sorted.join("+")
        )
        .to_lowercase();
        if !self.reaction_seen.check_and_mark(&fingerprint) {
            debug!(request_id = %request_id, "duplicate reaction decision ignored");
            return false;
        }

        self.resolve(&request_id, decision).await
    }

    /// Apply a decision to a request. Non-pending requests ignore further
    /// decisions; approved requests replay their stored tool call.
    pub async fn resolve(&self, request_id: &str, decision: Decision) -> bool {
        let request = {
            let mut requests = self.requests.write().await;
            let Some(request) = requests.get_mut(request_id) else {
                debug!(request_id, "decision for unknown request");
                return false;
            };
            let next = decision.to_status();
            if !request.status.can_transition_to(next) {
                debug!(request_id, status = ?request.status, "request already resolved");
                return false;
            }
            request.status = next;
            request.clone()
        };

        info!(request_id, decision = ?decision, tool = %request.tool_name, "approval resolved");

        match decision {
            Decision::Approve => self.execute_approved(&request).await,
            Decision::Clarify => {
                self.publish_result(
                    &request,
                    format!(
                        "❓ 어떤 결정인지 명확하지 않습니다. ✅/❌/⏸️/⛔ 중 하나로 답해주세요. (request_id:{request_id})"
                    ),
                );
            }
            Decision::Deny => {
                self.publish_result(&request, format!("❌ 거절되었습니다. ({})", request.tool_name));
            }
            Decision::Defer => {
                self.publish_result(&request, format!("⏸️ 보류되었습니다. ({})", request.tool_name));
            }
            Decision::Cancel => {
                self.publish_result(&request, format!("⛔ 취소되었습니다. ({})", request.tool_name));
            }
        }
        true
    }

    async fn execute_approved(&self, request: &ApprovalRequest) {
        let Some(tools) = self.tools.get() else {
            warn!(request_id = %request.request_id, "no tool registry attached");
            self.publish_result(request, "⚠️ 도구 레지스트리가 없어 실행하지 못했습니다.".into());
            return;
        };

        let ctx = ToolContext {
            task_id: request.context.task_id.clone(),
            channel: Some(request.context.channel.clone()),
            chat_id: Some(request.context.chat_id.clone()),
            sender_id: request.context.sender_id.clone(),
            from_cron: false,
            approved: true,
            abort: None,
            quiet: Default::default(),
        };

        let result = tools
            .execute(&request.tool_name, request.params.clone(), &ctx)
            .await;

        let body = match result {
            Ok(value) => {
                let rendered = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                format!("✅ 승인 반영 완료 ({})\n{}", request.tool_name, truncate(&rendered))
            }
            Err(e) => format!("⚠️ 승인되었지만 실행에 실패했습니다: {}", truncate(&e.to_string())),
        };
        self.publish_result(request, body);
    }

    fn publish_result(&self, request: &ApprovalRequest, body: String) {
        let mut msg = OutboundMessage::new(
            request.context.channel.clone(),
            request.context.chat_id.clone(),
            body,
            MessageKind::ApprovalResult,
        );
        msg.metadata.trigger_message_id = Some(request.request_id.clone());
        self.bus.publish_outbound(msg);
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() > MAX_RESULT_CHARS {
        let cut: String = s.chars().take(MAX_RESULT_CHARS).collect();
        format!("{cut}…")
    } else {
        s.to_owned()
    }
}

#[async_trait]
impl ApprovalSink for ApprovalService {
    async fn submit(&self, request: ApprovalRequest) {
        let body = format!(
            "🔐 승인 요청: `{}`\n```{}```\n✅ 승인 / ❌ 거절 / ⏸️ 보류 / ⛔ 취소\nrequest_id:{}",
            request.tool_name,
            serde_json::to_string_pretty(&request.params).unwrap_or_default(),
            request.request_id,
        );
        let mut msg = OutboundMessage::new(
            request.context.channel.clone(),
            request.context.chat_id.clone(),
            body,
            MessageKind::ApprovalRequest,
        );
        msg.metadata.trigger_message_id = Some(request.request_id.clone());
        self.bus.publish_outbound(msg);

        self.requests
            .write()
            .await
            .insert(request.request_id.clone(), request);
    }
}
