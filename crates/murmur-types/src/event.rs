//! Message event types for the channel bus.
//!
//! [`InboundMessage`] represents user input arriving from a chat provider,
//! [`OutboundMessage`] a reply heading back out. Both carry a typed
//! [`MessageMetadata`]: the keys the orchestration core reads are real
//! fields; provider-native payloads ride along in `extra`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of an outbound message, used for dedupe windows and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Final agent reply for a conversation turn.
    AgentReply,
    /// Incremental streaming update for an in-flight turn.
    AgentStream,
    /// Progress / status notice from the agent.
    AgentStatus,
    /// Agent-side failure notice.
    AgentError,
    /// A tool execution asking for human consent.
    ApprovalRequest,
    /// Result of executing (or rejecting) an approved tool.
    ApprovalResult,
    /// Reply produced by a slash-command handler.
    CommandReply,
    /// Scheduled system-event delivery.
    CronEvent,
    /// Result of a cron-driven agent turn.
    CronResult,
    /// A cron job failed.
    CronFailed,
    /// The agent is asking the user to attach a file.
    FileRequest,
    /// Workflow audit event mirrored into chat.
    WorkflowEvent,
    /// Internal system event.
    SystemEvent,
    /// Replayed message from task recovery; ignored by the router.
    TaskRecovery,
}

/// Typed metadata attached to messages.
///
/// The closed set of keys the core dispatches on lives here as fields;
/// anything provider-specific goes into `extra` untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Outbound message kind. Every dispatched message must set this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,

    /// Platform-native id of this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// Platform-native id of the inbound message this reply is attributable to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_message_id: Option<String>,

    /// Alias of the agent that produced this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_alias: Option<String>,

    /// Requeue count, advanced by the outbound dispatcher.
    #[serde(default)]
    pub dispatch_retry: u32,

    /// Set by transports when the sender is a bot account.
    #[serde(default)]
    pub from_is_bot: bool,

    /// Set when an agent turn produced no visible output (cron fallback).
    #[serde(default)]
    pub empty: bool,

    /// Mentioned aliases extracted by the transport, when it can do so.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mentions: Option<Vec<String>>,

    /// Render mode the dispatcher should apply, when pre-resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_mode: Option<String>,

    /// Provider-native payload passthrough.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl MessageMetadata {
    /// Metadata with only a kind set.
    pub fn of_kind(kind: MessageKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }
}

/// Media attachment kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    File,
    Link,
}

/// A media attachment. `url` may be a remote URL or a local workspace path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    /// Attachment kind.
    #[serde(rename = "type")]
    pub kind: MediaKind,

    /// Remote URL or local filesystem reference.
    pub url: String,

    /// MIME type when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,

    /// Original filename when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Size in bytes when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// An inbound message received from a chat provider.
///
/// Immutable after publish; the router and handlers only read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Message id assigned by the orchestrator.
    pub id: String,

    /// Provider name (`"slack"`, `"discord"`, `"telegram"`).
    pub provider: String,

    /// Chat / conversation identifier within the provider.
    pub chat_id: String,

    /// Sender identifier within the provider.
    pub sender_id: String,

    /// Message text content.
    pub content: String,

    /// When the message was received.
    #[serde(default = "Utc::now")]
    pub at: DateTime<Utc>,

    /// Thread identifier when the message belongs to a thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Attached media.
    #[serde(default)]
    pub media: Vec<MediaItem>,

    /// Typed metadata.
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl InboundMessage {
    /// Fingerprint used by the inbound seen-set:
    /// `provider:chat_id:message_id` lower-cased.
    pub fn seen_key(&self) -> String {
        let message_id = self
            .metadata
            .message_id
            .as_deref()
            .unwrap_or(self.id.as_str());
        format!("{}:{}:{}", self.provider, self.chat_id, message_id).to_lowercase()
    }
}

/// An outbound message to send to a chat provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Message id assigned by the orchestrator.
    pub id: String,

    /// Target provider name.
    pub provider: String,

    /// Target chat / conversation identifier.
    pub chat_id: String,

    /// Sender identity (agent alias or system name).
    #[serde(default)]
    pub sender_id: String,

    /// Message text content.
    pub content: String,

    /// When the message was produced.
    #[serde(default = "Utc::now")]
    pub at: DateTime<Utc>,

    /// Provider-native message id to reply to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    /// Thread identifier when replying into a thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Attached media.
    #[serde(default)]
    pub media: Vec<MediaItem>,

    /// Typed metadata; `kind` must be set before dispatch.
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl OutboundMessage {
    /// Build a minimal outbound message of the given kind.
    pub fn new(
        provider: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> Self {
        Self {
            id: format!("out-{}", uuid::Uuid::new_v4()),
            provider: provider.into(),
            chat_id: chat_id.into(),
            sender_id: String::new(),
            content: content.into(),
            at: Utc::now(),
            reply_to: None,
            thread_id: None,
            media: Vec::new(),
            metadata: MessageMetadata::of_kind(kind),
        }
    }
}
