//! Message tool.
//!
//! Lets the agent send a message to any chat through the outbound queue,
//! outside the normal reply path. When channel/chat are omitted the
//! conversation context supplied before the loop is used, and the run's
//! normal reply is suppressed so the user does not get the same content
//! twice.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use murmur_core::bus::MessageBus;
use murmur_core::tools::registry::{RuntimeContext, Tool, ToolContext, ToolError};
use murmur_types::event::{MessageKind, OutboundMessage};

/// The `message` tool.
pub struct MessageTool {
    bus: Arc<MessageBus>,
    runtime: Mutex<RuntimeContext>,
}

impl MessageTool {
    /// Create the tool over the outbound queue.
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            bus,
            runtime: Mutex::new(RuntimeContext::default()),
        }
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to a chat. Defaults to the current conversation when channel/chat_id are omitted."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "Message text" },
                "channel": { "type": "string", "description": "Target provider (optional)" },
                "chat_id": { "type": "string", "description": "Target chat id (optional)" }
            },
            "required": ["content"]
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
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: content".into()))?;

        let runtime = self.runtime.lock().expect("runtime context lock").clone();
        let channel = args
            .get("channel")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or(runtime.channel);
        let chat_id = args
            .get("chat_id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or(runtime.chat_id);

        if channel.is_empty() || chat_id.is_empty() {
            return Err(ToolError::InvalidArgs(
                "no target: channel/chat_id missing and no conversation context".into(),
            ));
        }

        debug!(channel = %channel, chat_id = %chat_id, "message tool dispatch");

        let same_chat = ctx.channel.as_deref() == Some(channel.as_str())
            && ctx.chat_id.as_deref() == Some(chat_id.as_str());

        let mut msg = OutboundMessage::new(&channel, &chat_id, content, MessageKind::AgentReply);
        msg.reply_to = runtime.reply_to.clone();
        if same_chat {
            msg.metadata.trigger_message_id = runtime.reply_to;
            ctx.set_quiet();
        }
        self.bus.publish_outbound(msg);

        Ok(json!({
            "status": "sent",
            "channel": channel,
            "chat_id": chat_id,
            "content_length": content.len(),
        }))
    }
}
