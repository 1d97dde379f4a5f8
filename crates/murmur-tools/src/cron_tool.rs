//! Cron tool.
//!
//! Lets the agent schedule, list, and remove cron jobs. New jobs default
//! their delivery target to the originating conversation.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use murmur_core::commands::{CronControl, parse_schedule_spec};
use murmur_core::tools::registry::{RuntimeContext, Tool, ToolContext, ToolError};
use murmur_types::cron::{CronPayload, PayloadKind, ScheduleKind};

/// The `cron` tool.
pub struct CronTool {
    control: Arc<dyn CronControl>,
    runtime: Mutex<RuntimeContext>,
}

impl CronTool {
    /// Create the tool over the cron service.
    pub fn new(control: Arc<dyn CronControl>) -> Self {
        Self {
            control,
            runtime: Mutex::new(RuntimeContext::default()),
        }
    }
}

#[async_trait]
impl Tool for CronTool {
    fn name(&self) -> &str {
        "cron"
    }

    fn description(&self) -> &str {
        "Schedule a future or recurring job. Spec: 'every 10m …', 'at <iso> …', 'cron <5 fields> …', or '30분 후 …'."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["add", "list", "remove"],
                    "description": "What to do"
                },
                "spec": { "type": "string", "description": "Schedule spec plus message (add)" },
                "id": { "type": "string", "description": "Job id (remove)" }
            },
            "required": ["action"]
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
        let action = args
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: action".into()))?;

        match action {
            "add" => {
                let spec = args
                    .get("spec")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ToolError::InvalidArgs("add requires 'spec'".into()))?;
                let now_ms = chrono::Utc::now().timestamp_millis();
                let Some((schedule, message)) = parse_schedule_spec(spec, now_ms) else {
                    return Err(ToolError::InvalidArgs(format!(
                        "unparseable schedule spec: {spec}"
                    )));
                };

                let runtime = self.runtime.lock().expect("runtime context lock").clone();
                let payload = CronPayload {
                    kind: PayloadKind::AgentTurn,
                    message: message.clone(),
                    deliver: true,
                    channel: (!runtime.channel.is_empty()).then(|| runtime.channel.clone()),
                    to: (!runtime.chat_id.is_empty()).then(|| runtime.chat_id.clone()),
                };
                let one_shot = schedule.kind == ScheduleKind::At;

                let id = self
                    .control
                    .add(message, schedule, payload, one_shot)
                    .await
                    .map_err(ToolError::ExecutionFailed)?;
                Ok(json!({ "status": "scheduled", "job_id": id }))
            }
            "list" => {
                let jobs = self.control.list().await;
                let rows: Vec<serde_json::Value> = jobs
                    .iter()
                    .map(|j| {
                        json!({
                            "id": j.id,
                            "name": j.name,
                            "enabled": j.enabled,
                            "next_run_at_ms": j.state.next_run_at_ms,
                        })
                    })
                    .collect();
                Ok(json!({ "jobs": rows }))
            }
            "remove" => {
                let id = args
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ToolError::InvalidArgs("remove requires 'id'".into()))?;
                let removed = self.control.remove(id).await;
                Ok(json!({ "removed": removed, "id": id }))
            }
            other => Err(ToolError::InvalidArgs(format!("unknown action: {other}"))),
        }
    }
}
