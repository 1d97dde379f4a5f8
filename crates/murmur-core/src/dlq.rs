//! Dead-letter queue for undeliverable outbound messages.
//!
//! One JSONL record per dropped message. Appends are serialized through a
//! mutex so concurrent dispatcher failures never interleave lines. Append
//! failures are logged and swallowed; the DLQ must never take the
//! dispatcher down with it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, warn};

use murmur_types::event::OutboundMessage;

/// Content is truncated to this many characters in DLQ records.
const MAX_CONTENT_CHARS: usize = 4_000;

/// A dead-letter record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqRecord {
    /// When the message was dropped.
    pub at: DateTime<Utc>,
    /// Target provider.
    pub provider: String,
    /// Target chat.
    pub chat_id: String,
    /// Orchestrator message id.
    pub message_id: String,
    /// Sender identity.
    pub sender_id: String,
    /// Reply target, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Thread, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Send attempts made before dropping.
    pub retry_count: u32,
    /// Final error reason.
    pub error: String,
    /// Message content, truncated.
    pub content: String,
    /// Message metadata snapshot.
    pub metadata: serde_json::Value,
}

impl DlqRecord {
    /// Build a record from the dropped message.
    pub fn from_message(msg: &OutboundMessage, retry_count: u32, reason: &str) -> Self {
        let content = if msg.content.chars().count() > MAX_CONTENT_CHARS {
            msg.content.chars().take(MAX_CONTENT_CHARS).collect()
        } else {
            msg.content.clone()
        };
        Self {
            at: Utc::now(),
            provider: msg.provider.clone(),
            chat_id: msg.chat_id.clone(),
            message_id: msg.id.clone(),
            sender_id: msg.sender_id.clone(),
            reply_to: msg.reply_to.clone(),
            thread_id: msg.thread_id.clone(),
            retry_count,
            error: reason.to_owned(),
            content,
            metadata: serde_json::to_value(&msg.metadata).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Serialized JSONL writer for dead letters.
pub struct DeadLetterQueue {
    path: PathBuf,
    write_lock: Mutex<()>,
    dropped: AtomicU64,
}

impl DeadLetterQueue {
    /// Create a DLQ backed by the given file path.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a record. Failures are logged, never propagated.
    pub async fn append(&self, record: &DlqRecord) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(
            provider = %record.provider,
            chat_id = %record.chat_id,
            error = %record.error,
            retry_count = record.retry_count,
            "message dead-lettered"
        );

        let _guard = self.write_lock.lock().await;
        if let Err(e) = self.append_inner(record).await {
            error!(path = %self.path.display(), error = %e, "DLQ append failed");
        }
    }

    /// Total records dropped through this instance.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Load every record from the file, skipping malformed lines.
    pub async fn load(&self) -> Vec<DlqRecord> {
        let Ok(content) = tokio::fs::read_to_string(&self.path).await else {
            return Vec::new();
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }

    async fn append_inner(&self, record: &DlqRecord) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
