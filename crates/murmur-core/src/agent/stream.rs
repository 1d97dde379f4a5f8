//! Streaming update machinery for a single agent run.
//!
//! Token chunks accumulate in a buffer that flushes once it holds
//! `min_chars` or `interval_ms` has passed since the last flush. Every
//! flush is sanitized (ANSI escapes, secret material, shell noise,
//! persona leaks) and deduplicated against a sliding same-content window,
//! then handed to a single worker that drains an ordered queue so
//! emissions never interleave.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use murmur_types::config::StreamingConfig;

use crate::dedupe::SeenSet;

/// Same-content emissions within this window are dropped.
const CONTENT_DEDUPE_WINDOW_MS: i64 = 30_000;

fn ansi_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("static regex"))
}

fn secret_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"enc:v1:\S+|\{\{secret:[^}]*\}\}").expect("static regex"))
}

fn noise_line_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(?:\$ .*|> .*|npm (?:WARN|notice).*|\[\d+/\d+\].*|[⠁⠂⠄⡀⢀⠠⠐⠈◐◓◑◒|/\\-]+)$")
            .expect("static regex")
    })
}

fn persona_line_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?mi)^(?:you are an? .*assistant.*|system:.*|\[system prompt\].*)$")
            .expect("static regex")
    })
}

/// Strip ANSI escapes, secret tokens, shell-noise lines, and leaked
/// persona lines from a stream segment.
pub fn sanitize(text: &str) -> String {
    let text = ansi_pattern().replace_all(text, "");
    let text = secret_pattern().replace_all(&text, "[secret]");
    let text = noise_line_pattern().replace_all(&text, "");
    let text = persona_line_pattern().replace_all(&text, "");

    // Collapse the blank runs the line removals leave behind.
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Async consumer of ordered stream emissions.
pub type EmitFn = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Streaming state for one agent run.
pub struct StreamState {
    config: StreamingConfig,
    buffer: Mutex<String>,
    last_flush: Mutex<Instant>,
    emitted_any: AtomicBool,
    content_seen: SeenSet,
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StreamState {
    /// Create the state and start the single emission worker.
    pub fn new(config: StreamingConfig, emit: EmitFn) -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let worker = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                emit(text).await;
            }
        });

        Arc::new(Self {
            config,
            buffer: Mutex::new(String::new()),
            last_flush: Mutex::new(Instant::now()),
            emitted_any: AtomicBool::new(false),
            content_seen: SeenSet::new(CONTENT_DEDUPE_WINDOW_MS, 512),
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Append a token chunk, flushing when the thresholds are met.
    pub fn push(&self, chunk: &str) {
        if !self.config.enabled {
            return;
        }
        let should_flush = {
            let mut buffer = self.buffer.lock().expect("stream buffer lock");
            buffer.push_str(chunk);
            let elapsed = self.last_flush.lock().expect("stream clock lock").elapsed();
            buffer.chars().count() >= self.config.min_chars
                || elapsed >= Duration::from_millis(self.config.interval_ms)
        };
        if should_flush {
            self.flush();
        }
    }

    /// Flush the buffer through sanitize + dedupe into the ordered queue.
    pub fn flush(&self) {
        let pending = {
            let mut buffer = self.buffer.lock().expect("stream buffer lock");
            if buffer.is_empty() {
                return;
            }
            std::mem::take(&mut *buffer)
        };
        *self.last_flush.lock().expect("stream clock lock") = Instant::now();

        let clean = sanitize(&pending);
        if clean.is_empty() {
            return;
        }
        if !self.content_seen.check_and_mark(&clean) {
            return;
        }

        if let Some(tx) = self.tx.lock().expect("stream tx lock").as_ref()
            && tx.send(clean).is_ok()
        {
            self.emitted_any.store(true, Ordering::Release);
        }
    }

    /// Whether at least one chunk was visibly emitted.
    pub fn visibly_emitted(&self) -> bool {
        self.emitted_any.load(Ordering::Acquire)
    }

    /// Whether the final reply should be suppressed for this run.
    pub fn suppress_final(&self) -> bool {
        self.config.suppress_final_after_stream && self.visibly_emitted()
    }

    /// Flush the remainder and wait for the worker to drain the queue.
    pub async fn close(&self) {
        self.flush();
        let tx = self.tx.lock().expect("stream tx lock").take();
        drop(tx);
        let worker = self.worker.lock().expect("stream worker lock").take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as AsyncMutex;

    fn collecting() -> (EmitFn, Arc<AsyncMutex<Vec<String>>>) {
        let seen = Arc::new(AsyncMutex::new(Vec::new()));
        let seen_ref = seen.clone();
        let emit: EmitFn = Arc::new(move |text| {
            let seen = seen_ref.clone();
            Box::pin(async move {
                seen.lock().await.push(text);
            })
        });
        (emit, seen)
    }

    fn config(min_chars: usize) -> StreamingConfig {
        StreamingConfig {
            enabled: true,
            min_chars,
            interval_ms: 60_000,
            suppress_final_after_stream: true,
        }
    }

    #[test]
    fn sanitize_strips_ansi_and_secrets() {
        let input = "hello \x1b[31mred\x1b[0m enc:v1:abcd {{secret:db}} world";
        let clean = sanitize(input);
        assert_eq!(clean, "hello red [secret] [secret] world");
    }

    #[test]
    fn sanitize_drops_noise_and_persona_lines() {
        let input = "result line\n$ cargo build\nnpm WARN deprecated\nYou are a helpful assistant.\nreal output";
        let clean = sanitize(input);
        assert!(clean.contains("result line"));
        assert!(clean.contains("real output"));
        assert!(!clean.contains("cargo build"));
        assert!(!clean.contains("npm WARN"));
        assert!(!clean.to_lowercase().contains("assistant"));
    }

    #[tokio::test]
    async fn flushes_at_min_chars() {
        let (emit, seen) = collecting();
        let state = StreamState::new(config(10), emit);

        state.push("short");
        assert!(seen.lock().await.is_empty());

        state.push(" and long enough");
        state.close().await;

        let emissions = seen.lock().await;
        assert_eq!(emissions.len(), 1);
        assert!(emissions[0].contains("short and long enough"));
        assert!(state.visibly_emitted());
    }

    #[tokio::test]
    async fn duplicate_content_within_window_emits_once() {
        let (emit, seen) = collecting();
        let state = StreamState::new(config(1), emit);

        state.push("same chunk");
        state.push("same chunk");
        state.close().await;

        assert_eq!(seen.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn fully_sanitized_chunk_is_invisible() {
        let (emit, seen) = collecting();
        let state = StreamState::new(config(1), emit);

        state.push("$ rm -rf /tmp/x");
        state.close().await;

        assert!(seen.lock().await.is_empty());
        assert!(!state.visibly_emitted());
        assert!(!state.suppress_final());
    }

    #[tokio::test]
    async fn suppress_final_follows_config_and_emission() {
        let (emit, _seen) = collecting();
        let mut cfg = config(1);
        cfg.suppress_final_after_stream = false;
        let state = StreamState::new(cfg, emit);

        state.push("visible text");
        state.close().await;
        assert!(state.visibly_emitted());
        assert!(!state.suppress_final());
    }

    #[tokio::test]
    async fn disabled_streaming_emits_nothing() {
        let (emit, seen) = collecting();
        let mut cfg = config(1);
        cfg.enabled = false;
        let state = StreamState::new(cfg, emit);

        state.push("anything at all");
        state.close().await;
        assert!(seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn emissions_preserve_order() {
        let (emit, seen) = collecting();
        let state = StreamState::new(config(1), emit);

        for i in 0..20 {
            state.push(&format!("chunk number {i}"));
        }
        state.close().await;

        let emissions = seen.lock().await;
        let positions: Vec<usize> = emissions
            .iter()
            .map(|e| {
                (0..20)
                    .find(|i| e.contains(&format!("chunk number {i}")))
                    .unwrap()
            })
            .collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted, "worker must drain in push order");
    }
}
