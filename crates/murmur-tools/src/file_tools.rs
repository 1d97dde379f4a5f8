//! Workspace file tools: read, write, list.
//!
//! Paths resolve relative to the workspace directory and may not escape
//! it through `..` components. Writes inside the workspace run
//! immediately; a write addressed outside (absolute path beyond the
//! workspace) is rejected outright.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use murmur_core::tools::registry::{Tool, ToolContext, ToolError};

/// Files larger than this are truncated on read.
const MAX_READ_BYTES: usize = 64 * 1024;

/// Resolve a user path against the workspace, rejecting escapes.
pub fn resolve_in_workspace(workspace: &Path, user_path: &str) -> Result<PathBuf, ToolError> {
    let candidate = Path::new(user_path);
    if candidate.is_absolute() {
        return Err(ToolError::InvalidPath(format!(
            "absolute paths are not allowed: {user_path}"
        )));
    }
    let mut resolved = workspace.to_path_buf();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => {
                return Err(ToolError::InvalidPath(format!(
                    "path escapes the workspace: {user_path}"
                )));
            }
        }
    }
    Ok(resolved)
}

fn path_arg(args: &serde_json::Value) -> Result<&str, ToolError> {
    args.get("path")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArgs("missing required field: path".into()))
}

/// The `read_file` tool.
pub struct ReadFileTool {
    workspace: PathBuf,
}

impl ReadFileTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file from the workspace."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Workspace-relative path" }
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let path = resolve_in_workspace(&self.workspace, path_arg(&args)?)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("read failed: {e}")))?;
        let truncated = content.len() > MAX_READ_BYTES;
        let body = if truncated {
            content[..MAX_READ_BYTES].to_owned()
        } else {
            content
        };
        Ok(json!({ "content": body, "truncated": truncated }))
    }
}

/// The `write_file` tool.
pub struct WriteFileTool {
    workspace: PathBuf,
}

impl WriteFileTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a text file inside the workspace. Overwrites existing content."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Workspace-relative path" },
                "content": { "type": "string", "description": "File content" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let path = resolve_in_workspace(&self.workspace, path_arg(&args)?)?;
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: content".into()))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::ExecutionFailed(format!("mkdir failed: {e}")))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("write failed: {e}")))?;

        debug!(path = %path.display(), bytes = content.len(), "file written");
        Ok(json!({ "written": content.len(), "path": path_arg(&args)? }))
    }
}

/// The `list_dir` tool.
pub struct ListDirTool {
    workspace: PathBuf,
}

impl ListDirTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List entries of a workspace directory."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Workspace-relative path (default: root)" }
            }
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let user_path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let path = resolve_in_workspace(&self.workspace, user_path)?;

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("read_dir failed: {e}")))?;
        while let Ok(Some(entry)) = dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(json!({ "name": name, "dir": is_dir }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        Ok(json!({ "entries": entries }))
    }
}
