//! Approval request lifecycle types.
//!
//! A tool execution with side effects registers an [`ApprovalRequest`] and
//! returns a placeholder; the request is later resolved by a human decision
//! arriving as chat text or a reaction. Status transitions are monotone:
//! once a request leaves `Pending` it never returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting a decision.
    Pending,
    /// Approved; the stored tool call was (or is being) executed.
    Approved,
    /// Denied; the tool call is discarded.
    Denied,
    /// Deferred for later; still not executable.
    Deferred,
    /// Cancelled together with its surrounding work.
    Cancelled,
    /// The reply was ambiguous; a clarification was requested.
    Clarify,
}

impl ApprovalStatus {
    /// Whether a transition from `self` to `next` is allowed.
    /// Only `Pending` may move; every other status is terminal.
    pub fn can_transition_to(self, next: Self) -> bool {
        self == Self::Pending && next != Self::Pending
    }
}

/// A decision extracted from a chat reply or reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Deny,
    Defer,
    Cancel,
    Clarify,
}

impl Decision {
    /// Status this decision resolves a pending request to.
    pub fn to_status(self) -> ApprovalStatus {
        match self {
            Self::Approve => ApprovalStatus::Approved,
            Self::Deny => ApprovalStatus::Denied,
            Self::Defer => ApprovalStatus::Deferred,
            Self::Cancel => ApprovalStatus::Cancelled,
            Self::Clarify => ApprovalStatus::Clarify,
        }
    }
}

/// Conversation context an approval request belongs to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalContext {
    /// Provider the request was raised in.
    pub channel: String,

    /// Chat the request was raised in.
    pub chat_id: String,

    /// Sender who triggered the gated tool, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,

    /// Task the gated tool belongs to, when raised from a task loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// A tool execution gated on human consent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Unique request identifier (`req-…`).
    pub request_id: String,

    /// Name of the gated tool.
    pub tool_name: String,

    /// Original tool parameters, replayed verbatim on approval.
    pub params: serde_json::Value,

    /// When the request was registered.
    pub created_at: DateTime<Utc>,

    /// Current lifecycle status.
    pub status: ApprovalStatus,

    /// Conversation the decision must come from.
    pub context: ApprovalContext,
}

impl ApprovalRequest {
    /// Register a new pending request.
    pub fn new(tool_name: impl Into<String>, params: serde_json::Value, context: ApprovalContext) -> Self {
        Self {
            request_id: format!("req-{}", uuid::Uuid::new_v4()),
            tool_name: tool_name.into(),
            params,
            created_at: Utc::now(),
            status: ApprovalStatus::Pending,
            context,
        }
    }
}
