//! Run-key registry: one cancellation scope per conversation invocation.
//!
//! Every agent-loop invocation registers under
//! `run_key = provider:chat_id:alias` (lowercased). Registering a key
//! that is already live cancels and replaces the previous run; `/stop`
//! cancels every run whose key starts with the chat prefix.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Canonical run key for a conversation invocation.
pub fn run_key(provider: &str, chat_id: &str, alias: &str) -> String {
    format!("{provider}:{chat_id}:{alias}").to_lowercase()
}

/// Handle to a registered run; pass back to [`RunRegistry::finish`].
#[derive(Debug, Clone)]
pub struct RunHandle {
    key: String,
    id: u64,
    /// Cancellation token scoped to this run.
    pub token: CancellationToken,
}

/// Live run map.
#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<String, (u64, CancellationToken)>>,
    next_id: AtomicU64,
}

impl RunRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new run under `key`, cancelling any previous run with
    /// the same key.
    pub fn begin(&self, key: &str) -> RunHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let previous = self
            .runs
            .lock()
            .expect("run registry lock")
            .insert(key.to_owned(), (id, token.clone()));
        if let Some((_, previous)) = previous {
            debug!(run_key = %key, "replacing live run");
            previous.cancel();
        }
        RunHandle {
            key: key.to_owned(),
            id,
            token,
        }
    }

    /// Deregister a run; a no-op when the key was since replaced.
    pub fn finish(&self, handle: &RunHandle) {
        let mut runs = self.runs.lock().expect("run registry lock");
        if runs.get(&handle.key).is_some_and(|(id, _)| *id == handle.id) {
            runs.remove(&handle.key);
        }
    }

    /// Cancel a single run. Returns whether a live run existed.
    pub fn cancel(&self, key: &str) -> bool {
        let entry = self.runs.lock().expect("run registry lock").remove(key);
        match entry {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every run in one chat. Returns how many were cancelled.
    pub fn cancel_chat(&self, provider: &str, chat_id: &str) -> usize {
        let prefix = format!("{provider}:{chat_id}:").to_lowercase();
        let mut runs = self.runs.lock().expect("run registry lock");
        let keys: Vec<String> = runs
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        for key in &keys {
            if let Some((_, token)) = runs.remove(key) {
                token.cancel();
            }
        }
        keys.len()
    }

    /// Number of live runs.
    pub fn live_count(&self) -> usize {
        self.runs.lock().expect("run registry lock").len()
    }
}
