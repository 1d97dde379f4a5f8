//! Request and response types for chat completion calls.
//!
//! These mirror the OpenAI chat-completion wire format, the de facto
//! interchange shape across providers. Tool calls may arrive structured
//! here or as text the agent loop's parser recovers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Author role: `"system"`, `"user"`, `"assistant"`, or `"tool"`.
    pub role: String,

    /// Text content.
    pub content: String,

    /// For tool-result messages, the id of the call being answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool calls requested by the assistant in this message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    /// Create a message with role and content.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// System message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    /// User message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Unique identifier for this call.
    pub id: String,

    /// Call type; currently always `"function"`.
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,

    /// The function to invoke.
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".into()
}

impl ToolCall {
    /// Build a function call with JSON arguments.
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.to_string(),
            },
        }
    }

    /// Parsed arguments; malformed JSON reads as an empty object.
    pub fn arguments(&self) -> serde_json::Value {
        serde_json::from_str(&self.function.arguments)
            .unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// A function invocation within a tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    /// Function name.
    pub name: String,

    /// Arguments as a JSON string.
    pub arguments: String,
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    ToolCalls,
    Length,
    Error,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,

    /// Tokens in the completion.
    pub completion_tokens: u32,
}

/// Callback receiving streamed text chunks as they arrive.
pub type StreamSink = Arc<dyn Fn(&str) + Send + Sync>;

/// A chat completion request.
#[derive(Clone)]
pub struct ChatRequest {
    /// Conversation messages, oldest first.
    pub messages: Vec<ChatMessage>,

    /// Tool definitions in OpenAI function-calling format.
    pub tools: Vec<serde_json::Value>,

    /// Model override, when the caller wants a specific one.
    pub model: Option<String>,

    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    pub temperature: Option<f64>,

    /// Chunk callback; `None` disables streaming.
    pub on_stream: Option<StreamSink>,

    /// Abort signal; cancelling it aborts the in-flight request.
    pub abort: Option<tokio_util::sync::CancellationToken>,
}

impl std::fmt::Debug for ChatRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRequest")
            .field("messages", &self.messages.len())
            .field("tools", &self.tools.len())
            .field("model", &self.model)
            .field("streaming", &self.on_stream.is_some())
            .finish()
    }
}

impl ChatRequest {
    /// Minimal request from messages alone.
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            model: None,
            max_tokens: None,
            temperature: None,
            on_stream: None,
            abort: None,
        }
    }
}

/// A chat completion response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Assistant text content, when any.
    #[serde(default)]
    pub content: Option<String>,

    /// Structured tool calls, when any.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// Why generation stopped.
    #[serde(default = "default_finish")]
    pub finish_reason: FinishReason,

    /// Token usage.
    #[serde(default)]
    pub usage: Usage,

    /// Provider-reported reasoning text, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

fn default_finish() -> FinishReason {
    FinishReason::Stop
}

impl ChatResponse {
    /// Text-only response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Response requesting tool calls.
    pub fn with_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            finish_reason: FinishReason::ToolCalls,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        assert_eq!(ChatMessage::system("s").role, "system");
        assert_eq!(ChatMessage::user("u").role, "user");
        assert_eq!(ChatMessage::assistant("a").content, "a");
    }

    #[test]
    fn tool_call_arguments_parse() {
        let call = ToolCall::function("call_1", "ping", serde_json::json!({"value": "ok"}));
        assert_eq!(call.arguments()["value"], "ok");
        assert_eq!(call.call_type, "function");
    }

    #[test]
    fn malformed_arguments_read_as_empty_object() {
        let call = ToolCall {
            id: "c1".into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: "ping".into(),
                arguments: "{not json".into(),
            },
        };
        assert_eq!(call.arguments(), serde_json::json!({}));
    }

    #[test]
    fn tool_call_deserializes_without_type() {
        let call: ToolCall = serde_json::from_str(
            r#"{"id":"call_1","function":{"name":"ping","arguments":"{}"}}"#,
        )
        .unwrap();
        assert_eq!(call.call_type, "function");
    }

    #[test]
    fn response_constructors() {
        let r = ChatResponse::text("done");
        assert_eq!(r.content.as_deref(), Some("done"));
        assert_eq!(r.finish_reason, FinishReason::Stop);

        let r = ChatResponse::with_tool_calls(vec![ToolCall::function(
            "c1",
            "ping",
            serde_json::json!({}),
        )]);
        assert_eq!(r.finish_reason, FinishReason::ToolCalls);
        assert_eq!(r.tool_calls.len(), 1);
    }

    #[test]
    fn finish_reason_wire_format() {
        assert_eq!(
            serde_json::to_string(&FinishReason::ToolCalls).unwrap(),
            "\"tool_calls\""
        );
    }

    #[test]
    fn request_debug_hides_payload() {
        let req = ChatRequest::new(vec![ChatMessage::user("secret text")]);
        let dbg = format!("{req:?}");
        assert!(!dbg.contains("secret text"));
        assert!(dbg.contains("messages: 1"));
    }
}
