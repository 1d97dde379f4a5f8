//! Persisted node-sequence workflow loop.
//!
//! A task executes a caller-supplied ordered list of nodes. The cursor is
//! `memory["__step_index"]`; every mutation is written through the
//! [`TaskStore`] so a later call with the same task id resumes exactly
//! where the previous one stopped. A node returning `waiting_approval`
//! suspends the loop without running further nodes; re-entering the loop
//! continues from the cursor, so completed steps never re-execute.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use murmur_types::Result;
use murmur_types::task::{TaskState, TaskStatus};

use crate::stores::TaskStore;

/// What a node tells the loop after running.
#[derive(Debug, Default, Clone)]
pub struct NodeOutcome {
    /// Keys merged into task memory.
    pub memory_patch: Option<HashMap<String, serde_json::Value>>,
    /// Explicit next cursor; absent advances by one.
    pub next_step_index: Option<usize>,
    /// Label override for `current_step`.
    pub current_step: Option<String>,
    /// Status override; `waiting_approval` suspends, terminal states end
    /// the workflow, absent / `running` continues.
    pub status: Option<TaskStatus>,
    /// Exit reason accompanying a terminal status.
    pub exit_reason: Option<String>,
}

impl NodeOutcome {
    /// Continue to the next node.
    pub fn advance() -> Self {
        Self::default()
    }

    /// Suspend until an approval decision arrives.
    pub fn waiting_approval() -> Self {
        Self {
            status: Some(TaskStatus::WaitingApproval),
            ..Default::default()
        }
    }
}

/// One unit of workflow execution.
#[async_trait]
pub trait TaskNode: Send + Sync {
    /// Label recorded as `current_step` while this node runs.
    fn label(&self) -> &str;

    /// Run against the current state. An `Err` fails the workflow with
    /// the message as `exit_reason`.
    async fn run(&self, state: &TaskState) -> std::result::Result<NodeOutcome, String>;
}

/// Run (or resume) the workflow `task_id` over `nodes`.
///
/// On first create the cursor starts at `start_step_index`; on re-entry
/// the persisted cursor wins and `start_step_index` is ignored. Returns
/// the final persisted state of this call.
pub async fn run_task_loop(
    store: &dyn TaskStore,
    task_id: &str,
    title: &str,
    nodes: &[Arc<dyn TaskNode>],
    max_turns: u32,
    start_step_index: usize,
) -> Result<TaskState> {
    let mut task = match store.get(task_id).await? {
        Some(existing) => existing,
        None => {
            let task = TaskState::new(task_id, title, max_turns, start_step_index);
            store.upsert(&task).await?;
            task
        }
    };

    match task.status {
        TaskStatus::Running | TaskStatus::WaitingApproval => {
            task.status = TaskStatus::Running;
        }
        // Terminal states do not re-enter.
        _ => return Ok(task),
    }

    info!(task_id, step = task.step_index(), "task loop entered");

    loop {
        if task.current_turn >= task.max_turns {
            task.status = TaskStatus::MaxTurnsReached;
            task.exit_reason = "max_turns_reached".into();
            store.upsert(&task).await?;
            break;
        }

        let index = task.step_index();
        if index >= nodes.len() {
            task.status = TaskStatus::Completed;
            task.exit_reason = "workflow_completed".into();
            store.upsert(&task).await?;
            break;
        }

        let node = &nodes[index];
        task.current_step = node.label().to_owned();
        task.current_turn += 1;
        debug!(task_id, step = index, node = node.label(), "running node");

        let outcome = match node.run(&task).await {
            Ok(outcome) => outcome,
            Err(message) => {
                warn!(task_id, step = index, error = %message, "node failed");
                task.status = TaskStatus::Failed;
                task.exit_reason = message;
                store.upsert(&task).await?;
                break;
            }
        };

        if let Some(patch) = outcome.memory_patch {
            task.apply_patch(patch);
        }
        if let Some(step) = outcome.current_step {
            task.current_step = step;
        }

        match outcome.status {
            Some(TaskStatus::WaitingApproval) => {
                task.status = TaskStatus::WaitingApproval;
                if let Some(reason) = outcome.exit_reason {
                    task.exit_reason = reason;
                }
                store.upsert(&task).await?;
                info!(task_id, step = index, "task suspended for approval");
                break;
            }
            Some(TaskStatus::Running) | None => {
                let next = outcome.next_step_index.unwrap_or(index + 1);
                task.set_step_index(next.min(nodes.len()));
                store.upsert(&task).await?;
            }
            Some(terminal) => {
                task.status = terminal;
                task.exit_reason = outcome
                    .exit_reason
                    .unwrap_or_else(|| format!("{terminal:?}").to_lowercase());
                store.upsert(&task).await?;
                break;
            }
        }
    }

    info!(task_id, status = ?task.status, turns = task.current_turn, "task loop exited");
    Ok(task)
}

/// Resume a suspended task: same entry point, persisted cursor wins.
pub async fn resume_task(
    store: &dyn TaskStore,
    task_id: &str,
    nodes: &[Arc<dyn TaskNode>],
) -> Result<TaskState> {
    let Some(task) = store.get(task_id).await? else {
        return Err(murmur_types::MurmurError::Validation(format!(
            "unknown task: {task_id}"
        )));
    };
    run_task_loop(store, task_id, &task.title, nodes, task.max_turns, 0).await
}
