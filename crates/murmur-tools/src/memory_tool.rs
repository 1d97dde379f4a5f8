//! Memory tool.
//!
//! Lets the agent read, append, and search the long-term / daily memory
//! store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use murmur_core::stores::MemoryStore;
use murmur_core::tools::registry::{Tool, ToolContext, ToolError};

/// The `memory` tool.
pub struct MemoryTool {
    store: Arc<dyn MemoryStore>,
}

impl MemoryTool {
    /// Create the tool over the given store.
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        "memory"
    }

    fn description(&self) -> &str {
        "Read, append, or search long-term and daily memory."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["read", "append", "search"],
                    "description": "What to do"
                },
                "scope": {
                    "type": "string",
                    "enum": ["longterm", "daily"],
                    "description": "Which store to touch (read/append)"
                },
                "text": { "type": "string", "description": "Line to append" },
                "query": { "type": "string", "description": "Search query" }
            },
            "required": ["action"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let action = args
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: action".into()))?;
        let scope = args.get("scope").and_then(|v| v.as_str()).unwrap_or("longterm");

        match action {
            "read" => {
                let content = match scope {
                    "daily" => {
                        let today = Utc::now().format("%Y-%m-%d").to_string();
                        self.store.read_daily(&today).await
                    }
                    _ => self.store.read_longterm().await,
                }
                .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                Ok(json!({ "scope": scope, "content": content }))
            }
            "append" => {
                let text = args
                    .get("text")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ToolError::InvalidArgs("append requires 'text'".into()))?;
                match scope {
                    "daily" => self.store.append_daily(text).await,
                    _ => self.store.append_longterm(text).await,
                }
                .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                Ok(json!({ "scope": scope, "appended": text.len() }))
            }
            "search" => {
                let query = args
                    .get("query")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ToolError::InvalidArgs("search requires 'query'".into()))?;
                let hits = self
                    .store
                    .search(query, 20)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                Ok(json!({ "query": query, "hits": hits }))
            }
            other => Err(ToolError::InvalidArgs(format!("unknown action: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_types::Result;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeMemory {
        longterm: Mutex<Vec<String>>,
        daily: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MemoryStore for FakeMemory {
        async fn read_longterm(&self) -> Result<String> {
            Ok(self.longterm.lock().unwrap().join("\n"))
        }
        async fn append_longterm(&self, line: &str) -> Result<()> {
            self.longterm.lock().unwrap().push(line.to_owned());
            Ok(())
        }
        async fn read_daily(&self, _day: &str) -> Result<String> {
            Ok(self.daily.lock().unwrap().join("\n"))
        }
        async fn append_daily(&self, line: &str) -> Result<()> {
            self.daily.lock().unwrap().push(line.to_owned());
            Ok(())
        }
        async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>> {
            Ok(self
                .longterm
                .lock()
                .unwrap()
                .iter()
                .filter(|l| l.contains(query))
                .take(limit)
                .cloned()
                .collect())
        }
    }

    fn make_tool() -> (MemoryTool, Arc<FakeMemory>) {
        let store = Arc::new(FakeMemory::default());
        (MemoryTool::new(store.clone()), store)
    }

    #[tokio::test]
    async fn append_and_read_longterm() {
        let (tool, store) = make_tool();
        tool.execute(
            json!({"action": "append", "text": "사용자는 간결한 답을 선호"}),
            &ToolContext::default(),
        )
        .await
        .unwrap();

        assert_eq!(store.longterm.lock().unwrap().len(), 1);

        let result = tool
            .execute(json!({"action": "read"}), &ToolContext::default())
            .await
            .unwrap();
        assert!(result["content"].as_str().unwrap().contains("간결한"));
    }

    #[tokio::test]
    async fn daily_scope_routes_to_daily() {
        let (tool, store) = make_tool();
        tool.execute(
            json!({"action": "append", "scope": "daily", "text": "오늘의 기록"}),
            &ToolContext::default(),
        )
        .await
        .unwrap();
        assert_eq!(store.daily.lock().unwrap().len(), 1);
        assert!(store.longterm.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_returns_hits() {
        let (tool, _store) = make_tool();
        tool.execute(
            json!({"action": "append", "text": "배포 창구는 주중"}),
            &ToolContext::default(),
        )
        .await
        .unwrap();

        let result = tool
            .execute(
                json!({"action": "search", "query": "배포"}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(result["hits"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_actions_rejected() {
        let (tool, _store) = make_tool();
        for args in [
            json!({}),
            json!({"action": "destroy"}),
            json!({"action": "append"}),
            json!({"action": "search"}),
        ] {
            let err = tool.execute(args, &ToolContext::default()).await.unwrap_err();
            assert!(matches!(err, ToolError::InvalidArgs(_)));
        }
    }
}
