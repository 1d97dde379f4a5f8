//! Workflow event log.
//!
//! Append-only audit stream keyed by `event_id`. Appends are idempotent:
//! a seen id returns the stored event with `deduped` set and writes
//! nothing. Long-form `detail` text is written as a timestamped section
//! of a per-task markdown file next to the JSONL stream.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use murmur_types::Result;
use murmur_types::workflow::{EventFilter, WorkflowEvent};

/// Outcome of an append.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    /// Whether the id was already present (nothing written).
    pub deduped: bool,
    /// The stored event (the first append wins).
    pub event: WorkflowEvent,
}

/// Append-only workflow event log with per-task detail files.
pub struct WorkflowEventLog {
    events_path: PathBuf,
    details_dir: PathBuf,
    state: Mutex<LogState>,
}

struct LogState {
    by_id: HashMap<String, WorkflowEvent>,
    ordered: Vec<String>,
    loaded: bool,
}

impl WorkflowEventLog {
    /// Create a log under `dir`: `events.jsonl` plus `details/<task>.md`.
    pub fn new(dir: PathBuf) -> Self {
        Self {
            events_path: dir.join("events.jsonl"),
            details_dir: dir.join("details"),
            state: Mutex::new(LogState {
                by_id: HashMap::new(),
                ordered: Vec::new(),
                loaded: false,
            }),
        }
    }

    /// Append an event. Idempotent on `event_id`.
    pub async fn append(&self, mut event: WorkflowEvent) -> Result<AppendOutcome> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await;

        if let Some(existing) = state.by_id.get(&event.event_id) {
            debug!(event_id = %event.event_id, "duplicate event append");
            return Ok(AppendOutcome {
                deduped: true,
                event: existing.clone(),
            });
        }

        // Detail text lands in the per-task markdown file, not the stream.
        if let Some(detail) = event.detail.take() {
            let task = event.task_id.clone().unwrap_or_else(|| "untasked".into());
            match self.write_detail(&task, &event, &detail).await {
                Ok(file) => event.detail_file = Some(file),
                Err(e) => warn!(error = %e, "detail write failed"),
            }
        }

        self.append_line(&event).await?;
        state.by_id.insert(event.event_id.clone(), event.clone());
        state.ordered.push(event.event_id.clone());

        Ok(AppendOutcome {
            deduped: false,
            event,
        })
    }

    /// Events matching `filter`, newest first, offset/limit applied.
    pub async fn list(&self, filter: &EventFilter) -> Vec<WorkflowEvent> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await;

        let mut matched: Vec<WorkflowEvent> = state
            .ordered
            .iter()
            .filter_map(|id| state.by_id.get(id))
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.at.cmp(&a.at));

        let offset = filter.offset.min(matched.len());
        let end = match filter.limit {
            Some(limit) => (offset + limit).min(matched.len()),
            None => matched.len(),
        };
        matched[offset..end].to_vec()
    }

    async fn ensure_loaded(&self, state: &mut LogState) {
        if state.loaded {
            return;
        }
        state.loaded = true;

        let Ok(content) = tokio::fs::read_to_string(&self.events_path).await else {
            return;
        };
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<WorkflowEvent>(line) {
                Ok(event) => {
                    if !state.by_id.contains_key(&event.event_id) {
                        state.ordered.push(event.event_id.clone());
                        state.by_id.insert(event.event_id.clone(), event);
                    }
                }
                Err(e) => warn!(error = %e, "skipping invalid event line"),
            }
        }
    }

    async fn append_line(&self, event: &WorkflowEvent) -> Result<()> {
        if let Some(parent) = self.events_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn write_detail(
        &self,
        task: &str,
        event: &WorkflowEvent,
        detail: &str,
    ) -> Result<String> {
        tokio::fs::create_dir_all(&self.details_dir).await?;
        let file_name = format!("{}.md", sanitize_file_stem(task));
        let path = self.details_dir.join(&file_name);

        let section = format!(
            "\n## {} — {:?} ({})\n\n{}\n",
            event.at.format("%Y-%m-%d %H:%M:%S"),
            event.phase,
            event.event_id,
            detail
        );
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(section.as_bytes()).await?;
        file.flush().await?;
        Ok(format!("details/{file_name}"))
    }
}

fn sanitize_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use murmur_types::workflow::{EventSource, WorkflowPhase};

    fn tmp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("murmur-events-{}", uuid::Uuid::new_v4()))
    }

    fn event(id: &str, phase: WorkflowPhase) -> WorkflowEvent {
        WorkflowEvent {
            event_id: id.into(),
            run_id: "run-1".into(),
            task_id: Some("task-1".into()),
            agent_id: "claude".into(),
            phase,
            summary: format!("event {id}"),
            payload: serde_json::json!({}),
            provider: Some("slack".into()),
            channel: None,
            chat_id: "C1".into(),
            thread_id: None,
            source: EventSource::Agent,
            detail: None,
            detail_file: None,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn append_is_idempotent_on_event_id() {
        let dir = tmp_dir();
        let log = WorkflowEventLog::new(dir.clone());

        let first = log.append(event("evt-1", WorkflowPhase::Progress)).await.unwrap();
        assert!(!first.deduped);

        let mut changed = event("evt-1", WorkflowPhase::Done);
        changed.summary = "different body".into();
        let second = log.append(changed).await.unwrap();
        assert!(second.deduped);
        assert_eq!(second.event.summary, "event evt-1");
        assert_eq!(second.event.phase, WorkflowPhase::Progress);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn list_filters_and_orders_descending() {
        let dir = tmp_dir();
        let log = WorkflowEventLog::new(dir.clone());

        let mut early = event("evt-1", WorkflowPhase::Assign);
        early.at = Utc::now() - chrono::Duration::minutes(5);
        log.append(early).await.unwrap();
        log.append(event("evt-2", WorkflowPhase::Progress)).await.unwrap();
        log.append(event("evt-3", WorkflowPhase::Done)).await.unwrap();

        let all = log.list(&EventFilter::default()).await;
        assert_eq!(all.len(), 3);
        assert_eq!(all.last().unwrap().event_id, "evt-1", "oldest last");

        let only_done = log
            .list(&EventFilter {
                phase: Some(WorkflowPhase::Done),
                ..Default::default()
            })
            .await;
        assert_eq!(only_done.len(), 1);
        assert_eq!(only_done[0].event_id, "evt-3");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn limit_and_offset() {
        let dir = tmp_dir();
        let log = WorkflowEventLog::new(dir.clone());
        for i in 0..5 {
            let mut e = event(&format!("evt-{i}"), WorkflowPhase::Progress);
            e.at = Utc::now() + chrono::Duration::milliseconds(i);
            log.append(e).await.unwrap();
        }

        let page = log
            .list(&EventFilter {
                limit: Some(2),
                offset: 1,
                ..Default::default()
            })
            .await;
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].event_id, "evt-3");
        assert_eq!(page[1].event_id, "evt-2");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn detail_writes_to_task_file() {
        let dir = tmp_dir();
        let log = WorkflowEventLog::new(dir.clone());

        let mut e = event("evt-d", WorkflowPhase::Blocked);
        e.detail = Some("full stack trace here".into());
        let outcome = log.append(e).await.unwrap();
        assert_eq!(outcome.event.detail_file.as_deref(), Some("details/task-1.md"));
        assert!(outcome.event.detail.is_none());

        let content = tokio::fs::read_to_string(dir.join("details/task-1.md"))
            .await
            .unwrap();
        assert!(content.contains("full stack trace here"));
        assert!(content.contains("evt-d"));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn reload_from_disk_preserves_dedupe() {
        let dir = tmp_dir();
        {
            let log = WorkflowEventLog::new(dir.clone());
            log.append(event("evt-1", WorkflowPhase::Progress)).await.unwrap();
        }

        let reopened = WorkflowEventLog::new(dir.clone());
        let outcome = reopened
            .append(event("evt-1", WorkflowPhase::Progress))
            .await
            .unwrap();
        assert!(outcome.deduped);
        assert_eq!(reopened.list(&EventFilter::default()).await.len(), 1);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
