//! Tool registry and [`Tool`] trait definition.
//!
//! Defines the contract every tool satisfies and the [`ToolRegistry`]
//! that stores tools and dispatches execution by name. Execution is
//! mediated: a tool whose call has side effects either runs immediately
//! or registers an approval request through the [`ApprovalSink`] and
//! returns a placeholder transcript. A fixed set of tools is refused
//! when invoked from the cron context.
//!
//! Tool implementations live in `murmur-tools`; this module only defines
//! the contract and registry infrastructure.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use murmur_types::approval::{ApprovalContext, ApprovalRequest};

/// Error type for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The requested tool was not found in the registry.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// The arguments provided to the tool are invalid.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// The tool execution failed at runtime.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The tool is refused in the calling context (e.g. spawn from cron).
    #[error("tool '{tool}' blocked: {reason}")]
    Blocked { tool: String, reason: String },

    /// A filesystem path is invalid or escapes the workspace.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The tool execution exceeded its time limit.
    #[error("timeout after {0}s")]
    Timeout(u64),
}

/// Conversation context applied to tools before a loop starts.
#[derive(Debug, Clone, Default)]
pub struct RuntimeContext {
    /// Provider the conversation lives in.
    pub channel: String,
    /// Chat the conversation lives in.
    pub chat_id: String,
    /// Message to thread replies under, when any.
    pub reply_to: Option<String>,
}

/// Per-invocation execution context.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Task the invocation belongs to, when inside a task loop.
    pub task_id: Option<String>,
    /// Provider the invocation was triggered from.
    pub channel: Option<String>,
    /// Chat the invocation was triggered from.
    pub chat_id: Option<String>,
    /// Sender that triggered the invocation.
    pub sender_id: Option<String>,
    /// Set when the scheduler (not a person) drives the loop.
    pub from_cron: bool,
    /// Set when replaying a call the approval service already cleared.
    pub approved: bool,
    /// Abort signal for long-running tools.
    pub abort: Option<CancellationToken>,
    /// Set by tools that delivered their own outbound (message,
    /// request_file) so the run's normal reply is suppressed.
    pub quiet: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl ToolContext {
    /// Mark this run as self-delivered.
    pub fn set_quiet(&self) {
        self.quiet.store(true, std::sync::atomic::Ordering::Release);
    }

    /// Whether a tool marked the run self-delivered.
    pub fn is_quiet(&self) -> bool {
        self.quiet.load(std::sync::atomic::Ordering::Acquire)
    }
}

/// A tool the agent loop can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name, as exposed to the model.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters(&self) -> serde_json::Value;

    /// Whether this specific call needs human consent before running.
    ///
    /// Tools that mutate the host, touch files outside the workspace, or
    /// spend network traffic return `true` unless the call is provably
    /// read-only.
    fn requires_approval(&self, _args: &serde_json::Value) -> bool {
        false
    }

    /// Receive the conversation context before a loop starts.
    ///
    /// Default is a no-op; tools that address the originating chat
    /// (message, spawn, request_file, cron) override it.
    fn apply_runtime_context(&self, _ctx: &RuntimeContext) {}

    /// Execute the tool.
    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError>;
}

/// Receiver for approval requests raised during tool execution.
#[async_trait]
pub trait ApprovalSink: Send + Sync {
    /// Register a pending request and notify the originating chat.
    async fn submit(&self, request: ApprovalRequest);
}

/// Source of dynamically defined tools, polled for changes.
#[async_trait]
pub trait DynamicToolSource: Send + Sync {
    /// A signature that changes whenever the tool set changes.
    async fn signature(&self) -> String;

    /// The current dynamic tools.
    async fn load(&self) -> Vec<Arc<dyn Tool>>;
}

/// Default poll interval for dynamic tool refresh.
pub const DYNAMIC_REFRESH_INTERVAL: Duration = Duration::from_secs(2);

/// Registry of available tools, indexed by name.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    approval_sink: RwLock<Option<Arc<dyn ApprovalSink>>>,
    cron_blocked: HashSet<String>,
    dynamic_signature: RwLock<String>,
    dynamic_names: RwLock<HashSet<String>>,
}

impl ToolRegistry {
    /// Create an empty registry with the default cron-blocked set.
    pub fn new() -> Self {
        Self::with_cron_blocked(["spawn"].into_iter().map(String::from).collect())
    }

    /// Create a registry with an explicit cron-blocked tool set.
    pub fn with_cron_blocked(cron_blocked: HashSet<String>) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            approval_sink: RwLock::new(None),
            cron_blocked,
            dynamic_signature: RwLock::new(String::new()),
            dynamic_names: RwLock::new(HashSet::new()),
        }
    }

    /// Attach the approval sink. Second phase of construction: the sink
    /// (the approval service) needs the registry to exist first.
    pub async fn set_approval_sink(&self, sink: Arc<dyn ApprovalSink>) {
        *self.approval_sink.write().await = Some(sink);
    }

    /// Register a tool. A tool with the same name is replaced.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_owned();
        debug!(tool = %name, "registering tool");
        self.tools.write().await.insert(name, tool);
    }

    /// Whether a tool with this name exists.
    pub async fn has(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    /// Look up a tool by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool definitions in OpenAI function-calling format, sorted by name.
    pub async fn get_definitions(&self) -> Vec<serde_json::Value> {
        let tools = self.tools.read().await;
        let mut defs: Vec<(String, serde_json::Value)> = tools
            .iter()
            .map(|(name, tool)| {
                let schema = serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": name,
                        "description": tool.description(),
                        "parameters": tool.parameters(),
                    }
                });
                (name.clone(), schema)
            })
            .collect();
        defs.sort_by(|a, b| a.0.cmp(&b.0));
        defs.into_iter().map(|(_, schema)| schema).collect()
    }

    /// Push the conversation context into every tool that takes one.
    pub async fn apply_runtime_context(&self, ctx: &RuntimeContext) {
        for tool in self.tools.read().await.values() {
            tool.apply_runtime_context(ctx);
        }
    }

    /// Execute a tool by name with approval mediation.
    ///
    /// Gated calls register an [`ApprovalRequest`] and return a
    /// placeholder transcript instead of running.
    pub async fn execute(
        &self,
        name: &str,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let tool = self
            .get(name)
            .await
            .ok_or_else(|| ToolError::NotFound(name.to_owned()))?;

        if ctx.from_cron && self.cron_blocked.contains(name) {
            return Err(ToolError::Blocked {
                tool: name.to_owned(),
                reason: "not available from the cron context".into(),
            });
        }

        if !ctx.approved && tool.requires_approval(&params) {
            let sink = self.approval_sink.read().await.clone();
            let Some(sink) = sink else {
                return Err(ToolError::ExecutionFailed(
                    "approval required but no approval sink is attached".into(),
                ));
            };
            let request = ApprovalRequest::new(
                name,
                params,
                ApprovalContext {
                    channel: ctx.channel.clone().unwrap_or_default(),
                    chat_id: ctx.chat_id.clone().unwrap_or_default(),
                    sender_id: ctx.sender_id.clone(),
                    task_id: ctx.task_id.clone(),
                },
            );
            let request_id = request.request_id.clone();
            info!(tool = %name, request_id = %request_id, "tool gated on approval");
            sink.submit(request).await;
            return Ok(serde_json::json!({
                "status": "approval_pending",
                "request_id": request_id,
                "tool": name,
            }));
        }

        tool.execute(params, ctx).await
    }

    /// Refresh dynamic tools when the source signature changed.
    pub async fn refresh_dynamic(&self, source: &dyn DynamicToolSource) {
        let signature = source.signature().await;
        {
            let current = self.dynamic_signature.read().await;
            if *current == signature {
                return;
            }
        }

        let fresh = source.load().await;
        let fresh_names: HashSet<String> =
            fresh.iter().map(|t| t.name().to_owned()).collect();

        let mut tools = self.tools.write().await;
        let previous = self.dynamic_names.read().await.clone();
        for stale in previous.difference(&fresh_names) {
            tools.remove(stale);
        }
        for tool in fresh {
            tools.insert(tool.name().to_owned(), tool);
        }
        drop(tools);

        info!(count = fresh_names.len(), "dynamic tools refreshed");
        *self.dynamic_names.write().await = fresh_names;
        *self.dynamic_signature.write().await = signature;
    }

    /// Poll a dynamic source until cancelled.
    pub async fn run_dynamic_refresh(
        self: Arc<Self>,
        source: Arc<dyn DynamicToolSource>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    self.refresh_dynamic(source.as_ref()).await;
                }
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a tool result (or error) as a transcript line for the model.
pub fn transcript_line(name: &str, result: &Result<serde_json::Value, ToolError>) -> String {
    match result {
        Ok(value) => {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("[tool:{name}] {rendered}")
        }
        Err(e) => format!("[tool:{name}] error: {e}"),
    }
}
