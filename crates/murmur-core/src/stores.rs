//! Persistent-store seams.
//!
//! Tasks, session transcripts, memory, decisions, and promises live in
//! external row stores. The core reaches them through these traits;
//! `murmur-services` ships file-backed implementations and tests use the
//! in-memory ones here.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use murmur_types::Result;
use murmur_types::task::TaskState;

/// Row store for task workflow state.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All persisted tasks.
    async fn list(&self) -> Result<Vec<TaskState>>;

    /// Fetch one task.
    async fn get(&self, task_id: &str) -> Result<Option<TaskState>>;

    /// Insert or replace a task row.
    async fn upsert(&self, task: &TaskState) -> Result<()>;
}

/// One recorded session message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    /// `"user"` or `"assistant"`.
    pub role: String,
    /// Redacted content.
    pub content: String,
    /// When the message was recorded.
    pub at: DateTime<Utc>,
}

/// Row store for per-conversation transcripts.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Append a message under `key`.
    async fn add_message(&self, key: &str, msg: SessionMessage) -> Result<()>;

    /// The tail of the transcript under `key`, newest last.
    async fn get_history(&self, key: &str, max_messages: usize) -> Result<Vec<SessionMessage>>;
}

/// Long-term + daily memory store.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Read the long-term memory document.
    async fn read_longterm(&self) -> Result<String>;

    /// Append a line to long-term memory.
    async fn append_longterm(&self, line: &str) -> Result<()>;

    /// Read one day's memory (`day` = `YYYY-MM-DD`).
    async fn read_daily(&self, day: &str) -> Result<String>;

    /// Append a line to today's memory.
    async fn append_daily(&self, line: &str) -> Result<()>;

    /// Search memory for lines containing `query`.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>>;
}

/// A standing decision applied to agent behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Decision name.
    pub name: String,
    /// Decision body.
    pub value: String,
    /// Higher priority wins on conflicts.
    pub priority: i32,
    /// When the decision was set.
    pub at: DateTime<Utc>,
}

/// Store of standing decisions.
#[async_trait]
pub trait DecisionStore: Send + Sync {
    /// Set (or replace) a decision.
    async fn set(&self, record: DecisionRecord) -> Result<()>;

    /// Effective decisions, highest priority first.
    async fn list(&self) -> Result<Vec<DecisionRecord>>;

    /// One decision by name.
    async fn get(&self, name: &str) -> Result<Option<DecisionRecord>>;
}

/// A promise made to a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromiseRecord {
    /// Promise id.
    pub id: String,
    /// What was promised.
    pub text: String,
    /// Who it was promised to.
    pub to: String,
    /// When it was made.
    pub at: DateTime<Utc>,
    /// Whether it is fulfilled.
    pub done: bool,
}

/// Store of promises.
#[async_trait]
pub trait PromiseStore: Send + Sync {
    /// Record a promise.
    async fn add(&self, record: PromiseRecord) -> Result<()>;

    /// All promises, newest first.
    async fn list(&self) -> Result<Vec<PromiseRecord>>;
}

// ---------------------------------------------------------------------------
// In-memory implementations (tests and single-process wiring)
// ---------------------------------------------------------------------------

/// In-memory [`TaskStore`].
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: tokio::sync::RwLock<HashMap<String, TaskState>>,
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn list(&self) -> Result<Vec<TaskState>> {
        Ok(self.tasks.read().await.values().cloned().collect())
    }

    async fn get(&self, task_id: &str) -> Result<Option<TaskState>> {
        Ok(self.tasks.read().await.get(task_id).cloned())
    }

    async fn upsert(&self, task: &TaskState) -> Result<()> {
        self.tasks
            .write()
            .await
            .insert(task.task_id.clone(), task.clone());
        Ok(())
    }
}

/// In-memory [`SessionStore`].
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: tokio::sync::RwLock<HashMap<String, Vec<SessionMessage>>>,
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn add_message(&self, key: &str, msg: SessionMessage) -> Result<()> {
        self.sessions
            .write()
            .await
            .entry(key.to_owned())
            .or_default()
            .push(msg);
        Ok(())
    }

    async fn get_history(&self, key: &str, max_messages: usize) -> Result<Vec<SessionMessage>> {
        let sessions = self.sessions.read().await;
        let Some(messages) = sessions.get(key) else {
            return Ok(Vec::new());
        };
        let start = messages.len().saturating_sub(max_messages);
        Ok(messages[start..].to_vec())
    }
}
