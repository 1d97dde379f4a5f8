//! Immutable runtime configuration.
//!
//! [`Config`] is built once at bootstrap from the process environment and
//! passed through constructors; nothing reads `std::env` after startup.
//! [`Config::from_vars`] takes an explicit key→value lookup so tests can
//! build configs without touching the ambient environment.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::secret::SecretString;

/// Chat providers the orchestrator knows how to address.
pub const PROVIDERS: &[&str] = &["slack", "discord", "telegram"];

/// Per-provider channel settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Bot token for the provider API.
    #[serde(default)]
    pub bot_token: SecretString,

    /// Default chat to address when none is given (cron, auto-reply).
    #[serde(default)]
    pub default_channel: String,
}

impl ProviderConfig {
    /// Whether this provider is configured well enough to use.
    pub fn is_configured(&self) -> bool {
        !self.bot_token.is_empty()
    }
}

/// Inbound router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Poll interval across transports, in milliseconds.
    pub poll_interval_ms: u64,

    /// Maximum concurrent inbound handlers.
    pub inbound_concurrency: usize,

    /// Messages fetched per `read` call.
    pub read_limit: usize,

    /// Reply without a mention when a default provider is configured.
    pub auto_reply: bool,

    /// Per-(provider, chat, alias) mention cooldown in milliseconds.
    pub mention_cooldown_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_500,
            inbound_concurrency: 4,
            read_limit: 20,
            auto_reply: false,
            mention_cooldown_ms: 5_000,
        }
    }
}

/// Outbound dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Inline retries before considering a requeue.
    pub inline_max: u32,

    /// Base backoff delay in milliseconds; grows as `base * 2^(n-1)`.
    pub backoff_base_ms: u64,

    /// Cap on a single backoff delay.
    pub backoff_max_ms: u64,

    /// Upper bound of the uniform jitter added to each delay.
    pub jitter_ms: u64,

    /// Maximum requeues per message.
    pub retry_max: u32,

    /// Whether exhausted inline retries may requeue at all.
    pub allow_requeue: bool,

    /// Dead-letter file path.
    pub dlq_path: PathBuf,

    /// Dedupe window for streaming updates, in milliseconds.
    pub stream_dedupe_window_ms: u64,

    /// Dedupe window for final replies, in milliseconds.
    pub reply_dedupe_window_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            inline_max: 0,
            backoff_base_ms: 500,
            backoff_max_ms: 15_000,
            jitter_ms: 250,
            retry_max: 3,
            allow_requeue: true,
            dlq_path: PathBuf::from("runtime/dlq/outbound"),
            stream_dedupe_window_ms: 5_000,
            reply_dedupe_window_ms: 60_000,
        }
    }
}

/// Streaming flush settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Whether streaming updates are emitted at all.
    pub enabled: bool,

    /// Flush once the buffer holds at least this many characters.
    pub min_chars: usize,

    /// Flush at least this often while tokens arrive, in milliseconds.
    pub interval_ms: u64,

    /// Suppress the final reply when a stream chunk was visibly emitted.
    pub suppress_final_after_stream: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_chars: 80,
            interval_ms: 1_200,
            suppress_final_after_stream: true,
        }
    }
}

/// Agent / task loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Turn budget for the agent loop.
    pub agent_max_turns: u32,

    /// Node-invocation budget for the task loop.
    pub task_max_turns: u32,

    /// Primary LLM provider id.
    pub executor_provider: String,

    /// One-shot fallback provider id for agent mode, when configured.
    pub fallback_provider: Option<String>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            agent_max_turns: 12,
            task_max_turns: 50,
            executor_provider: "claude_code".into(),
            fallback_provider: None,
        }
    }
}

/// Cron scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    /// Scheduler tick interval in milliseconds.
    pub tick_ms: u64,

    /// Grace window before a stuck `running` job is re-eligible.
    pub stuck_grace_ms: i64,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            tick_ms: 5_000,
            stuck_grace_ms: 10 * 60 * 1_000,
        }
    }
}

/// Top-level immutable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Workspace directory for file tools and runtime state.
    pub workspace_dir: PathBuf,

    /// Default agent alias addressed by bare mentions.
    pub default_alias: String,

    /// Per-provider channel settings keyed by provider name.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Inbound router settings.
    #[serde(default)]
    pub router: RouterConfig,

    /// Outbound dispatcher settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Streaming settings.
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Loop settings.
    #[serde(default)]
    pub loops: LoopConfig,

    /// Cron settings.
    #[serde(default)]
    pub cron: CronConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("."),
            default_alias: "claude".into(),
            providers: HashMap::new(),
            router: RouterConfig::default(),
            dispatch: DispatchConfig::default(),
            streaming: StreamingConfig::default(),
            loops: LoopConfig::default(),
            cron: CronConfig::default(),
        }
    }
}

impl Config {
    /// Build a config from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build a config from an explicit variable lookup.
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(dir) = get("WORKSPACE_DIR") {
            cfg.workspace_dir = PathBuf::from(dir);
        }
        if let Some(alias) = get("DEFAULT_AGENT_ALIAS") {
            cfg.default_alias = alias;
        }

        for provider in PROVIDERS {
            let upper = provider.to_uppercase();
            let token = get(&format!("{upper}_BOT_TOKEN")).unwrap_or_default();
            let default_channel = get(&format!("{upper}_DEFAULT_CHANNEL")).unwrap_or_default();
            if !token.is_empty() || !default_channel.is_empty() {
                cfg.providers.insert(
                    (*provider).to_string(),
                    ProviderConfig {
                        bot_token: SecretString::new(token),
                        default_channel,
                    },
                );
            }
        }

        set_u64(&get, "CHANNEL_POLL_INTERVAL_MS", &mut cfg.router.poll_interval_ms);
        set_usize(&get, "CHANNEL_INBOUND_CONCURRENCY", &mut cfg.router.inbound_concurrency);
        set_usize(&get, "CHANNEL_READ_LIMIT", &mut cfg.router.read_limit);
        set_bool(&get, "CHANNEL_AUTO_REPLY", &mut cfg.router.auto_reply);

        set_bool(&get, "CHANNEL_STREAMING_ENABLED", &mut cfg.streaming.enabled);
        set_usize(&get, "CHANNEL_STREAMING_MIN_CHARS", &mut cfg.streaming.min_chars);
        set_u64(&get, "CHANNEL_STREAMING_INTERVAL_MS", &mut cfg.streaming.interval_ms);
        set_bool(
            &get,
            "CHANNEL_STREAMING_SUPPRESS_FINAL",
            &mut cfg.streaming.suppress_final_after_stream,
        );

        set_u32(&get, "CHANNEL_DISPATCH_RETRY_INLINE_MAX", &mut cfg.dispatch.inline_max);
        set_u64(&get, "CHANNEL_DISPATCH_RETRY_BASE_MS", &mut cfg.dispatch.backoff_base_ms);
        set_u64(&get, "CHANNEL_DISPATCH_RETRY_MAX_MS", &mut cfg.dispatch.backoff_max_ms);
        set_u64(&get, "CHANNEL_DISPATCH_RETRY_JITTER_MS", &mut cfg.dispatch.jitter_ms);
        set_u32(&get, "CHANNEL_DISPATCH_RETRY_MAX", &mut cfg.dispatch.retry_max);
        set_bool(&get, "CHANNEL_DISPATCH_ALLOW_REQUEUE", &mut cfg.dispatch.allow_requeue);
        if let Some(path) = get("CHANNEL_DISPATCH_DLQ_PATH") {
            cfg.dispatch.dlq_path = PathBuf::from(path);
        }

        set_u32(&get, "AGENT_LOOP_MAX_TURNS", &mut cfg.loops.agent_max_turns);
        set_u32(&get, "TASK_LOOP_MAX_TURNS", &mut cfg.loops.task_max_turns);
        if let Some(provider) = get("ORCH_EXECUTOR_PROVIDER") {
            cfg.loops.executor_provider = provider;
        }
        if let Some(provider) = get("ORCH_FALLBACK_PROVIDER") {
            cfg.loops.fallback_provider = Some(provider);
        }

        set_u64(&get, "CRON_TICK_MS", &mut cfg.cron.tick_ms);

        cfg
    }

    /// Provider settings when the provider is configured.
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name).filter(|p| p.is_configured())
    }
}

fn set_u64(get: &impl Fn(&str) -> Option<String>, key: &str, target: &mut u64) {
    if let Some(v) = get(key).and_then(|v| v.parse().ok()) {
        *target = v;
    }
}

fn set_u32(get: &impl Fn(&str) -> Option<String>, key: &str, target: &mut u32) {
    if let Some(v) = get(key).and_then(|v| v.parse().ok()) {
        *target = v;
    }
}

fn set_usize(get: &impl Fn(&str) -> Option<String>, key: &str, target: &mut usize) {
    if let Some(v) = get(key).and_then(|v| v.parse().ok()) {
        *target = v;
    }
}

fn set_bool(get: &impl Fn(&str) -> Option<String>, key: &str, target: &mut bool) {
    if let Some(v) = get(key) {
        *target = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
    }
}
