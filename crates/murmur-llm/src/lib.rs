//! LLM provider interface for murmur.
//!
//! Defines the [`ChatProvider`] trait the agent loop drives plus the
//! OpenAI-format request/response types exchanged with it. Concrete
//! provider adapters (HTTP, subprocess executors) live outside the
//! orchestration core and implement [`ChatProvider`].

pub mod error;
pub mod provider;
pub mod types;

pub use error::{ProviderError, Result};
pub use provider::ChatProvider;
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, FinishReason, FunctionCall, StreamSink, ToolCall, Usage,
};
