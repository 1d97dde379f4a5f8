//! The [`ChatProvider`] trait driven by the agent loop.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChatRequest, ChatResponse};

/// A provider that can execute chat completion requests.
///
/// Implementations handle auth, transport, and response parsing for one
/// backend. The agent loop only depends on this trait; providers that do
/// not emit structured tool calls may return them as text, which the
/// loop's parser recovers.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider id (e.g. `"claude_code"`, `"openai"`).
    fn id(&self) -> &str;

    /// Whether the backend natively supports multi-turn tool calling.
    fn supports_tool_loop(&self) -> bool {
        true
    }

    /// Execute one chat completion.
    ///
    /// Implementations must honor `request.abort` (return
    /// [`ProviderError::Aborted`](crate::ProviderError::Aborted) promptly)
    /// and invoke `request.on_stream` with text chunks when streaming.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;
}
