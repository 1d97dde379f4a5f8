//! Tool contract and registry.

pub mod registry;

pub use registry::{
    ApprovalSink, RuntimeContext, Tool, ToolContext, ToolError, ToolRegistry,
};
