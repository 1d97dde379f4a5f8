//! Spawn tool.
//!
//! Forks a sibling agent loop for a delegated objective. The actual
//! spawning lives behind [`SubAgentSpawner`] so the tool stays free of
//! orchestrator wiring; the registry refuses this tool from the cron
//! context.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use murmur_core::tools::registry::{RuntimeContext, Tool, ToolContext, ToolError};

/// Concurrent sub-agents allowed per process.
const MAX_CONCURRENT_SPAWNS: usize = 5;

/// Launches sibling agent loops.
#[async_trait]
pub trait SubAgentSpawner: Send + Sync {
    /// Number of sub-agents currently running.
    fn active(&self) -> usize;

    /// Launch a detached sub-agent working `objective`, reporting into
    /// `(channel, chat_id)`. Returns the sub-agent id.
    async fn spawn(
        &self,
        objective: &str,
        channel: &str,
        chat_id: &str,
    ) -> Result<String, String>;
}

/// The `spawn` tool.
pub struct SpawnTool {
    spawner: Arc<dyn SubAgentSpawner>,
    runtime: Mutex<RuntimeContext>,
}

impl SpawnTool {
    /// Create the tool over a spawner implementation.
    pub fn new(spawner: Arc<dyn SubAgentSpawner>) -> Self {
        Self {
            spawner,
            runtime: Mutex::new(RuntimeContext::default()),
        }
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Delegate an objective to a detached sub-agent that reports back into the chat."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "objective": { "type": "string", "description": "What the sub-agent should do" }
            },
            "required": ["objective"]
        })
    }

    fn apply_runtime_context(&self, ctx: &RuntimeContext) {
        *self.runtime.lock().expect("runtime context lock") = ctx.clone();
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let objective = args
            .get("objective")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: objective".into()))?;

        if self.spawner.active() >= MAX_CONCURRENT_SPAWNS {
            return Err(ToolError::ExecutionFailed(format!(
                "concurrency limit reached: {} active sub-agents (max {MAX_CONCURRENT_SPAWNS})",
                self.spawner.active()
            )));
        }

        let runtime = self.runtime.lock().expect("runtime context lock").clone();
        if runtime.channel.is_empty() || runtime.chat_id.is_empty() {
            return Err(ToolError::ExecutionFailed(
                "no conversation context for spawn".into(),
            ));
        }

        debug!(objective, channel = %runtime.channel, "spawning sub-agent");
        let agent_id = self
            .spawner
            .spawn(objective, &runtime.channel, &runtime.chat_id)
            .await
            .map_err(ToolError::ExecutionFailed)?;

        Ok(json!({
            "status": "spawned",
            "agent_id": agent_id,
            "objective": objective,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSpawner {
        running: AtomicUsize,
        launched: Mutex<Vec<String>>,
    }

    impl FakeSpawner {
        fn new(running: usize) -> Arc<Self> {
            Arc::new(Self {
                running: AtomicUsize::new(running),
                launched: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SubAgentSpawner for FakeSpawner {
        fn active(&self) -> usize {
            self.running.load(Ordering::SeqCst)
        }

        async fn spawn(
            &self,
            objective: &str,
            _channel: &str,
            _chat_id: &str,
        ) -> Result<String, String> {
            self.launched.lock().unwrap().push(objective.to_owned());
            Ok(format!("subagent:{}", self.launched.lock().unwrap().len()))
        }
    }

    fn tool_with_context(spawner: Arc<FakeSpawner>) -> SpawnTool {
        let tool = SpawnTool::new(spawner);
        tool.apply_runtime_context(&RuntimeContext {
            channel: "slack".into(),
            chat_id: "C1".into(),
            reply_to: None,
        });
        tool
    }

    #[tokio::test]
    async fn spawns_with_conversation_context() {
        let spawner = FakeSpawner::new(0);
        let tool = tool_with_context(spawner.clone());

        let result = tool
            .execute(
                json!({"objective": "로그 분석"}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(result["status"], "spawned");
        assert!(result["agent_id"].as_str().unwrap().starts_with("subagent:"));
        assert_eq!(spawner.launched.lock().unwrap().as_slice(), ["로그 분석"]);
    }

    #[tokio::test]
    async fn concurrency_limit_enforced() {
        let spawner = FakeSpawner::new(MAX_CONCURRENT_SPAWNS);
        let tool = tool_with_context(spawner);

        let err = tool
            .execute(json!({"objective": "x"}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("concurrency limit"));
    }

    #[tokio::test]
    async fn missing_objective_is_invalid() {
        let tool = tool_with_context(FakeSpawner::new(0));
        let err = tool
            .execute(json!({}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
    }

    #[tokio::test]
    async fn without_context_fails() {
        let tool = SpawnTool::new(FakeSpawner::new(0));
        let err = tool
            .execute(json!({"objective": "x"}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)));
    }
}
