//! Web fetch tool.
//!
//! Capped GET fetch over http(s). Body size and timeout are bounded so a
//! hostile page cannot blow up a tool transcript.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use murmur_core::tools::registry::{Tool, ToolContext, ToolError};

/// Bodies are truncated to this many bytes.
const MAX_BODY_BYTES: usize = 100 * 1024;

/// Per-request timeout.
const FETCH_TIMEOUT_SECS: u64 = 20;

/// The `web_fetch` tool.
pub struct WebFetchTool {
    client: reqwest::Client,
}

impl WebFetchTool {
    /// Build the tool with its own HTTP client.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .user_agent("murmur/0.4")
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL over GET and return status plus a truncated body."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "http(s) URL to fetch" }
            },
            "required": ["url"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: url".into()))?;

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::InvalidArgs(format!(
                "only http(s) URLs are supported: {url}"
            )));
        }

        debug!(url, "web fetch");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("fetch failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("body read failed: {e}")))?;

        let truncated = body.len() > MAX_BODY_BYTES;
        let body = if truncated {
            body.chars().take(MAX_BODY_BYTES).collect()
        } else {
            body
        };

        Ok(json!({
            "status": status,
            "body": body,
            "truncated": truncated,
            "url": url,
        }))
    }
}
