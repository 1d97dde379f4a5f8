//! Shell execution tool.
//!
//! Runs a command under `sh -c` in the workspace directory with a
//! wall-clock timeout. Commands that write to the filesystem or escalate
//! (redirections, rm, sudo, package managers) gate on human approval;
//! plain read-only invocations run immediately.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use murmur_core::tools::registry::{Tool, ToolContext, ToolError};

/// Default timeout for spawned commands.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Output larger than this is truncated in the result.
const MAX_OUTPUT_BYTES: usize = 32 * 1024;

/// Commands whose first token is in this list run without approval, as
/// long as no mutating marker appears.
const SAFE_COMMANDS: &[&str] = &[
    "echo", "ls", "pwd", "cat", "head", "tail", "wc", "grep", "date", "whoami", "uname", "which",
    "env", "printf",
];

/// Substrings that always force approval.
const MUTATING_MARKERS: &[&str] = &[
    ">", "rm ", "rmdir", "sudo", "mv ", "cp ", "chmod", "chown", "dd ", "mkfs", "curl ", "wget ",
    "kill", "shutdown", "reboot", "apt ", "apt-get", "npm ", "pip ", "brew ",
];

/// Whether a shell command needs human consent before running.
pub fn command_needs_approval(command: &str) -> bool {
    let trimmed = command.trim();
    if MUTATING_MARKERS.iter().any(|m| trimmed.contains(m)) {
        return true;
    }
    let first = trimmed.split_whitespace().next().unwrap_or("");
    !SAFE_COMMANDS.contains(&first)
}

/// The `exec` tool.
pub struct ExecTool {
    workspace: PathBuf,
}

impl ExecTool {
    /// Create an exec tool rooted at the workspace directory.
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace directory. Mutating commands require approval."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout": {
                    "type": "number",
                    "description": "Timeout in seconds (default 60)"
                }
            },
            "required": ["command"]
        })
    }

    fn requires_approval(&self, args: &serde_json::Value) -> bool {
        args.get("command")
            .and_then(|v| v.as_str())
            .is_none_or(command_needs_approval)
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: command".into()))?;

        let timeout_secs = args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        debug!(command, workspace = %self.workspace.display(), "exec");

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolError::ExecutionFailed(format!(
                    "failed to spawn '{command}': {e}"
                )));
            }
            Err(_) => {
                warn!(command, timeout_secs, "exec timed out");
                return Err(ToolError::Timeout(timeout_secs));
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code != 0 {
            warn!(command, exit_code, "exec exited non-zero");
        }

        Ok(json!({
            "exit_code": exit_code,
            "stdout": truncate_output(&output.stdout),
            "stderr": truncate_output(&output.stderr),
            "command": command,
        }))
    }
}

fn truncate_output(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() > MAX_OUTPUT_BYTES {
        format!("{}… (truncated)", &text[..MAX_OUTPUT_BYTES])
    } else {
        text.into_owned()
    }
}
