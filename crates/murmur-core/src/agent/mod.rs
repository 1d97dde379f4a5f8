//! The agent loop and its supporting machinery.
//!
//! [`loop_core`] runs the bounded LLM turn loop; [`tool_calls`] recovers
//! tool calls that arrive as text; [`stream`] rate-limits, sanitizes, and
//! serializes streaming updates; [`runs`] maps run keys to cancellation
//! tokens.

pub mod loop_core;
pub mod runs;
pub mod stream;
pub mod tool_calls;

pub use loop_core::{
    AgentLoopOptions, AgentLoopResult, AgentLoopState, LoopStatus, RegistryToolHandler,
    ToolCallHandler, run_agent_loop,
};
pub use runs::{RunHandle, RunRegistry, run_key};
