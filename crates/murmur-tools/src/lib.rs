//! Built-in tool implementations.
//!
//! Each tool satisfies `murmur_core::tools::Tool`. Side-effecting calls
//! gate through the approval service via `requires_approval`; tools that
//! address the originating chat take the conversation context through
//! `apply_runtime_context`.

pub mod cron_tool;
pub mod exec_tool;
pub mod file_tools;
pub mod memory_tool;
pub mod message_tool;
pub mod request_file_tool;
pub mod spawn_tool;
pub mod web_fetch;

use std::path::PathBuf;
use std::sync::Arc;

use murmur_core::bus::MessageBus;
use murmur_core::commands::CronControl;
use murmur_core::stores::MemoryStore;
use murmur_core::tools::registry::ToolRegistry;

pub use spawn_tool::SubAgentSpawner;

/// Register the standard tool set.
pub async fn register_builtin_tools(
    registry: &ToolRegistry,
    workspace: PathBuf,
    bus: Arc<MessageBus>,
    memory: Arc<dyn MemoryStore>,
    cron: Arc<dyn CronControl>,
    spawner: Arc<dyn SubAgentSpawner>,
) {
    registry
        .register(Arc::new(exec_tool::ExecTool::new(workspace.clone())))
        .await;
    registry
        .register(Arc::new(file_tools::ReadFileTool::new(workspace.clone())))
        .await;
    registry
        .register(Arc::new(file_tools::WriteFileTool::new(workspace.clone())))
        .await;
    registry
        .register(Arc::new(file_tools::ListDirTool::new(workspace)))
        .await;
    registry
        .register(Arc::new(web_fetch::WebFetchTool::new()))
        .await;
    registry
        .register(Arc::new(memory_tool::MemoryTool::new(memory)))
        .await;
    registry
        .register(Arc::new(message_tool::MessageTool::new(bus.clone())))
        .await;
    registry
        .register(Arc::new(request_file_tool::RequestFileTool::new(bus)))
        .await;
    registry
        .register(Arc::new(cron_tool::CronTool::new(cron)))
        .await;
    registry
        .register(Arc::new(spawn_tool::SpawnTool::new(spawner)))
        .await;
}
