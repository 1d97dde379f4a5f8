//! File request tool.
//!
//! Asks the user to attach a file. Publishes a `file_request` outbound
//! into the originating chat and silences the run's normal reply; the
//! attachment arrives later as ordinary inbound media.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use murmur_core::bus::MessageBus;
use murmur_core::tools::registry::{RuntimeContext, Tool, ToolContext, ToolError};
use murmur_types::event::{MessageKind, OutboundMessage};

/// The `request_file` tool.
pub struct RequestFileTool {
    bus: Arc<MessageBus>,
    runtime: Mutex<RuntimeContext>,
}

impl RequestFileTool {
    /// Create the tool over the outbound queue.
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            bus,
            runtime: Mutex::new(RuntimeContext::default()),
        }
    }
}

#[async_trait]
impl Tool for RequestFileTool {
    fn name(&self) -> &str {
        "request_file"
    }

    fn description(&self) -> &str {
        "Ask the user to attach a file to the conversation."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string", "description": "What to ask for" },
                "accept": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Accepted file extensions"
                }
            },
            "required": ["prompt"]
        })
    }

    fn apply_runtime_context(&self, ctx: &RuntimeContext) {
        *self.runtime.lock().expect("runtime context lock") = ctx.clone();
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let prompt = args
            .get("prompt")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: prompt".into()))?;
        let accept: Vec<String> = args
            .get("accept")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let runtime = self.runtime.lock().expect("runtime context lock").clone();
        if runtime.channel.is_empty() || runtime.chat_id.is_empty() {
            return Err(ToolError::ExecutionFailed(
                "no conversation context for file request".into(),
            ));
        }

        let mut content = format!("[FILE_REQUEST] {prompt}");
        if !accept.is_empty() {
            content.push_str(&format!(" (허용: {})", accept.join(", ")));
        }

        let mut msg = OutboundMessage::new(
            &runtime.channel,
            &runtime.chat_id,
            content,
            MessageKind::FileRequest,
        );
        msg.reply_to = runtime.reply_to.clone();
        msg.metadata.trigger_message_id = runtime.reply_to;
        self.bus.publish_outbound(msg);

        // The request itself is the user-visible output of this run.
        ctx.set_quiet();

        Ok(json!({
            "status": "file_requested",
            "prompt": prompt,
            "accept": accept,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publishes_file_request_and_silences_reply() {
        let bus = MessageBus::new();
        let tool = RequestFileTool::new(bus.clone());
        tool.apply_runtime_context(&RuntimeContext {
            channel: "slack".into(),
            chat_id: "C1".into(),
            reply_to: Some("m-1".into()),
        });

        let ctx = ToolContext::default();
        let result = tool
            .execute(
                json!({"prompt": "PDF 첨부해 주세요", "accept": ["pdf"]}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(result["status"], "file_requested");
        assert!(ctx.is_quiet());

        let out = bus
            .consume_outbound(Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(out.metadata.kind, Some(MessageKind::FileRequest));
        assert!(out.content.to_uppercase().contains("[FILE_REQUEST"));
        assert!(out.content.contains("PDF 첨부해 주세요"));
        assert!(out.content.contains("pdf"));
        assert_eq!(out.metadata.trigger_message_id.as_deref(), Some("m-1"));
    }

    #[tokio::test]
    async fn without_context_fails() {
        let bus = MessageBus::new();
        let tool = RequestFileTool::new(bus);
        let err = tool
            .execute(json!({"prompt": "anything"}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)));
    }

    #[tokio::test]
    async fn missing_prompt_is_invalid() {
        let bus = MessageBus::new();
        let tool = RequestFileTool::new(bus);
        let err = tool
            .execute(json!({}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
    }
}
