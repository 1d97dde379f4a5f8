//! Task workflow types.
//!
//! [`TaskState`] is the persisted record of a resumable node-sequence
//! workflow. The workflow cursor lives inside `memory` under
//! [`STEP_INDEX_KEY`] so that node code and the loop share one source of
//! truth; [`TaskState::step_index`] / [`set_step_index`](TaskState::set_step_index)
//! are the only accessors.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Memory key holding the 0-based workflow cursor.
pub const STEP_INDEX_KEY: &str = "__step_index";

/// Memory key holding the human-readable last-update timestamp (KST).
pub const UPDATED_AT_KEY: &str = "__updated_at_seoul";

/// Status of a task workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// The workflow is executing nodes.
    Running,
    /// All nodes completed.
    Completed,
    /// Suspended until an approval decision arrives.
    WaitingApproval,
    /// A node raised an error.
    Failed,
    /// Cancelled by the user.
    Cancelled,
    /// The node-invocation budget was exhausted.
    MaxTurnsReached,
}

/// Persisted state of a task workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    /// Unique task identifier.
    pub task_id: String,

    /// Human-readable title.
    pub title: String,

    /// Node invocations consumed so far.
    #[serde(default)]
    pub current_turn: u32,

    /// Node-invocation budget.
    pub max_turns: u32,

    /// Workflow status.
    pub status: TaskStatus,

    /// Label of the node currently (or last) executing.
    #[serde(default)]
    pub current_step: String,

    /// Why the workflow exited, when it has.
    #[serde(default)]
    pub exit_reason: String,

    /// Workflow scratch memory, including the `__step_index` cursor.
    #[serde(default)]
    pub memory: HashMap<String, serde_json::Value>,
}

impl TaskState {
    /// Create a fresh running task with the cursor at `start_step_index`.
    pub fn new(
        task_id: impl Into<String>,
        title: impl Into<String>,
        max_turns: u32,
        start_step_index: usize,
    ) -> Self {
        let mut state = Self {
            task_id: task_id.into(),
            title: title.into(),
            current_turn: 0,
            max_turns,
            status: TaskStatus::Running,
            current_step: String::new(),
            exit_reason: String::new(),
            memory: HashMap::new(),
        };
        state.set_step_index(start_step_index);
        state
    }

    /// The 0-based workflow cursor. Missing or malformed values read as 0.
    pub fn step_index(&self) -> usize {
        self.memory
            .get(STEP_INDEX_KEY)
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(0)
    }

    /// Move the workflow cursor and stamp the update time.
    pub fn set_step_index(&mut self, index: usize) {
        self.memory
            .insert(STEP_INDEX_KEY.into(), serde_json::json!(index));
        self.touch();
    }

    /// Refresh the human-readable update timestamp (UTC+9).
    pub fn touch(&mut self) {
        let seoul = Utc::now() + chrono::Duration::hours(9);
        self.memory.insert(
            UPDATED_AT_KEY.into(),
            serde_json::json!(seoul.format("%Y-%m-%d %H:%M:%S").to_string()),
        );
    }

    /// Merge a node's memory patch into the task memory.
    pub fn apply_patch(&mut self, patch: HashMap<String, serde_json::Value>) {
        for (k, v) in patch {
            self.memory.insert(k, v);
        }
        self.touch();
    }
}
