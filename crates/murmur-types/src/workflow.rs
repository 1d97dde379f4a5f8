//! Workflow audit event types.
//!
//! [`WorkflowEvent`] is the append-only audit record the event log stores,
//! keyed and deduplicated by `event_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of a workflow event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Assign,
    Progress,
    Blocked,
    Done,
    Approval,
}

/// Who emitted the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    System,
    User,
    Leader,
    Agent,
}

/// An append-only workflow audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// Unique event identifier; appends with a seen id are no-ops.
    pub event_id: String,

    /// Run this event belongs to.
    #[serde(default)]
    pub run_id: String,

    /// Task this event belongs to, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    /// Agent alias that emitted or is addressed by the event.
    #[serde(default)]
    pub agent_id: String,

    /// Workflow phase.
    pub phase: WorkflowPhase,

    /// One-line summary.
    pub summary: String,

    /// Structured payload.
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Provider the event relates to, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Channel name, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Chat the event relates to.
    #[serde(default)]
    pub chat_id: String,

    /// Thread, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Who emitted the event.
    pub source: EventSource,

    /// Long-form detail text, written to the per-task detail file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// Relative path of the detail file a `detail` write landed in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_file: Option<String>,

    /// When the event occurred.
    #[serde(default = "Utc::now")]
    pub at: DateTime<Utc>,
}

/// Filter for listing workflow events. All fields are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub phase: Option<WorkflowPhase>,
    pub task_id: Option<String>,
    pub run_id: Option<String>,
    pub agent_id: Option<String>,
    pub chat_id: Option<String>,
    pub source: Option<EventSource>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl EventFilter {
    /// Whether `event` passes this filter.
    pub fn matches(&self, event: &WorkflowEvent) -> bool {
        if let Some(phase) = self.phase
            && event.phase != phase
        {
            return false;
        }
        if let Some(ref task_id) = self.task_id
            && event.task_id.as_deref() != Some(task_id.as_str())
        {
            return false;
        }
        if let Some(ref run_id) = self.run_id
            && &event.run_id != run_id
        {
            return false;
        }
        if let Some(ref agent_id) = self.agent_id
            && &event.agent_id != agent_id
        {
            return false;
        }
        if let Some(ref chat_id) = self.chat_id
            && &event.chat_id != chat_id
        {
            return false;
        }
        if let Some(source) = self.source
            && event.source != source
        {
            return false;
        }
        true
    }
}
