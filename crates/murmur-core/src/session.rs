//! Session recorder.
//!
//! Records user/assistant exchanges per `(provider, chat, thread, alias)`
//! and serves the recent tail with an age filter. Every recorded line is
//! also appended, best-effort, to the daily memory store; memory failures
//! never surface to callers.

use std::sync::{Arc, OnceLock};

use chrono::{Duration, Utc};
use regex::Regex;
use tracing::debug;

use murmur_types::Result;

use crate::stores::{MemoryStore, SessionMessage, SessionStore};

fn secret_material_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"enc:v1:\S+|\{\{secret:[^}]*\}\}").expect("static regex"))
}

/// Daily-memory lines are truncated to this many characters.
const MEMORY_LINE_CHARS: usize = 200;

/// Build the canonical session key.
///
/// Thread scope is `thread:<id>` when a thread is present; otherwise
/// Slack collapses to `thread:root` and every other provider to
/// `thread:default`.
pub fn session_key(provider: &str, chat_id: &str, thread_id: Option<&str>, alias: &str) -> String {
    let scope = match thread_id {
        Some(id) if !id.is_empty() => format!("thread:{id}"),
        _ if provider.eq_ignore_ascii_case("slack") => "thread:root".into(),
        _ => "thread:default".into(),
    };
    format!("{provider}:{chat_id}:{scope}:{alias}").to_lowercase()
}

/// Replace vault material with a marker before anything is persisted.
pub fn redact(text: &str) -> String {
    secret_material_pattern()
        .replace_all(text, "[secret]")
        .into_owned()
}

/// Records conversation history and mirrors it into daily memory.
pub struct SessionRecorder {
    sessions: Arc<dyn SessionStore>,
    memory: Option<Arc<dyn MemoryStore>>,
}

impl SessionRecorder {
    /// Create a recorder over the given stores.
    pub fn new(sessions: Arc<dyn SessionStore>, memory: Option<Arc<dyn MemoryStore>>) -> Self {
        Self { sessions, memory }
    }

    /// Record a user message.
    pub async fn record_user(
        &self,
        provider: &str,
        chat_id: &str,
        thread_id: Option<&str>,
        alias: &str,
        content: &str,
    ) -> Result<()> {
        self.record(provider, chat_id, thread_id, alias, "user", content)
            .await
    }

    /// Record an assistant message.
    pub async fn record_assistant(
        &self,
        provider: &str,
        chat_id: &str,
        thread_id: Option<&str>,
        alias: &str,
        content: &str,
    ) -> Result<()> {
        self.record(provider, chat_id, thread_id, alias, "assistant", content)
            .await
    }

    async fn record(
        &self,
        provider: &str,
        chat_id: &str,
        thread_id: Option<&str>,
        alias: &str,
        role: &str,
        content: &str,
    ) -> Result<()> {
        let key = session_key(provider, chat_id, thread_id, alias);
        let redacted = redact(content);
        self.sessions
            .add_message(
                &key,
                SessionMessage {
                    role: role.to_owned(),
                    content: redacted.clone(),
                    at: Utc::now(),
                },
            )
            .await?;

        if let Some(memory) = &self.memory {
            let snippet: String = redacted.chars().take(MEMORY_LINE_CHARS).collect();
            let line = format!("[{provider}:{chat_id}] {role}: {}", snippet.replace('\n', " "));
            if let Err(e) = memory.append_daily(&line).await {
                debug!(error = %e, "daily memory append failed");
            }
        }
        Ok(())
    }

    /// The recent tail for a conversation, oldest first, dropping
    /// messages older than `max_age_ms` when given.
    pub async fn get_history(
        &self,
        provider: &str,
        chat_id: &str,
        thread_id: Option<&str>,
        alias: &str,
        max_messages: usize,
        max_age_ms: Option<i64>,
    ) -> Result<Vec<SessionMessage>> {
        let key = session_key(provider, chat_id, thread_id, alias);
        let mut history = self.sessions.get_history(&key, max_messages).await?;
        if let Some(max_age_ms) = max_age_ms {
            let cutoff = Utc::now() - Duration::milliseconds(max_age_ms);
            history.retain(|m| m.at >= cutoff);
        }
        Ok(history)
    }
}
