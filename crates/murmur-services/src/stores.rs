//! File-backed implementations of the core store traits.
//!
//! One JSON row per task under `runtime/tasks/`, markdown documents for
//! long-term and daily memory, JSONL ledgers for decisions and promises.
//! Every writer serializes through a mutex so concurrent callers never
//! interleave partial writes.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use murmur_core::stores::{
    DecisionRecord, DecisionStore, MemoryStore, PromiseRecord, PromiseStore, TaskStore,
};
use murmur_types::Result;
use murmur_types::task::TaskState;

async fn append_line(path: &PathBuf, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await?;
    Ok(())
}

/// One JSON file per task row.
pub struct FileTaskStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTaskStore {
    /// Create a store rooted at `dir` (usually `runtime/tasks`).
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, task_id: &str) -> PathBuf {
        let stem: String = task_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{stem}.json"))
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn list(&self) -> Result<Vec<TaskState>> {
        let mut tasks = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return Ok(tasks);
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.path().extension().is_none_or(|e| e != "json") {
                continue;
            }
            match tokio::fs::read_to_string(entry.path()).await {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(task) => tasks.push(task),
                    Err(e) => warn!(path = %entry.path().display(), error = %e, "bad task row"),
                },
                Err(e) => warn!(error = %e, "task row read failed"),
            }
        }
        Ok(tasks)
    }

    async fn get(&self, task_id: &str) -> Result<Option<TaskState>> {
        let path = self.path_for(task_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert(&self, task: &TaskState) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&task.task_id);
        let body = serde_json::to_string_pretty(task)?;
        tokio::fs::write(&path, body).await?;
        Ok(())
    }
}

/// Markdown-file memory store: `MEMORY.md` plus `daily/<day>.md`.
pub struct FileMemoryStore {
    longterm_path: PathBuf,
    daily_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileMemoryStore {
    /// Create a store rooted at `dir` (usually `runtime/memory`).
    pub fn new(dir: PathBuf) -> Self {
        Self {
            longterm_path: dir.join("MEMORY.md"),
            daily_dir: dir.join("daily"),
            write_lock: Mutex::new(()),
        }
    }

    fn daily_path(&self, day: &str) -> PathBuf {
        self.daily_dir.join(format!("{day}.md"))
    }

    fn today() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn read_longterm(&self) -> Result<String> {
        Ok(tokio::fs::read_to_string(&self.longterm_path)
            .await
            .unwrap_or_default())
    }

    async fn append_longterm(&self, line: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        append_line(&self.longterm_path, line).await
    }

    async fn read_daily(&self, day: &str) -> Result<String> {
        Ok(tokio::fs::read_to_string(self.daily_path(day))
            .await
            .unwrap_or_default())
    }

    async fn append_daily(&self, line: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let stamped = format!("- {} {}", Utc::now().format("%H:%M:%S"), line);
        append_line(&self.daily_path(&Self::today()), &stamped).await
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>> {
        let needle = query.to_lowercase();
        let mut hits = Vec::new();

        for line in self.read_longterm().await?.lines() {
            if line.to_lowercase().contains(&needle) {
                hits.push(line.to_owned());
                if hits.len() >= limit {
                    return Ok(hits);
                }
            }
        }

        // Walk daily files newest-first.
        let mut days: Vec<PathBuf> = Vec::new();
        if let Ok(mut entries) = tokio::fs::read_dir(&self.daily_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                days.push(entry.path());
            }
        }
        days.sort();
        for path in days.iter().rev() {
            let Ok(content) = tokio::fs::read_to_string(path).await else {
                continue;
            };
            for line in content.lines() {
                if line.to_lowercase().contains(&needle) {
                    hits.push(line.to_owned());
                    if hits.len() >= limit {
                        return Ok(hits);
                    }
                }
            }
        }
        Ok(hits)
    }
}

/// JSONL decision ledger; the latest record per name wins.
pub struct FileDecisionStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileDecisionStore {
    /// Create a ledger at `path`.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Vec<DecisionRecord> {
        let Ok(content) = tokio::fs::read_to_string(&self.path).await else {
            return Vec::new();
        };
        let mut by_name = std::collections::HashMap::<String, DecisionRecord>::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<DecisionRecord>(line) {
                Ok(record) => {
                    by_name.insert(record.name.clone(), record);
                }
                Err(e) => warn!(error = %e, "bad decision line"),
            }
        }
        by_name.into_values().collect()
    }
}

#[async_trait]
impl DecisionStore for FileDecisionStore {
    async fn set(&self, record: DecisionRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        append_line(&self.path, &serde_json::to_string(&record)?).await
    }

    async fn list(&self) -> Result<Vec<DecisionRecord>> {
        let mut records = self.load().await;
        records.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(records)
    }

    async fn get(&self, name: &str) -> Result<Option<DecisionRecord>> {
        Ok(self.load().await.into_iter().find(|r| r.name == name))
    }
}

/// JSONL promise ledger.
pub struct FilePromiseStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FilePromiseStore {
    /// Create a ledger at `path`.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl PromiseStore for FilePromiseStore {
    async fn add(&self, record: PromiseRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        append_line(&self.path, &serde_json::to_string(&record)?).await
    }

    async fn list(&self) -> Result<Vec<PromiseRecord>> {
        let Ok(content) = tokio::fs::read_to_string(&self.path).await else {
            return Ok(Vec::new());
        };
        let mut records: Vec<PromiseRecord> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();
        records.sort_by(|a, b| b.at.cmp(&a.at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("murmur-stores-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn task_store_roundtrip() {
        let dir = tmp_dir();
        let store = FileTaskStore::new(dir.clone());

        let mut task = TaskState::new("task-1", "deploy", 20, 0);
        task.set_step_index(3);
        store.upsert(&task).await.unwrap();

        let loaded = store.get("task-1").await.unwrap().unwrap();
        assert_eq!(loaded.title, "deploy");
        assert_eq!(loaded.step_index(), 3);

        assert!(store.get("task-2").await.unwrap().is_none());
        assert_eq!(store.list().await.unwrap().len(), 1);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn task_store_upsert_replaces() {
        let dir = tmp_dir();
        let store = FileTaskStore::new(dir.clone());

        let mut task = TaskState::new("task-1", "deploy", 20, 0);
        store.upsert(&task).await.unwrap();
        task.current_turn = 7;
        store.upsert(&task).await.unwrap();

        let loaded = store.get("task-1").await.unwrap().unwrap();
        assert_eq!(loaded.current_turn, 7);
        assert_eq!(store.list().await.unwrap().len(), 1);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn memory_store_daily_and_search() {
        let dir = tmp_dir();
        let store = FileMemoryStore::new(dir.clone());

        store.append_longterm("선호: 간결한 보고").await.unwrap();
        store.append_daily("[slack:C1] user: 배포 요청").await.unwrap();

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let daily = store.read_daily(&today).await.unwrap();
        assert!(daily.contains("배포 요청"));

        let hits = store.search("배포", 10).await.unwrap();
        assert_eq!(hits.len(), 1);

        let hits = store.search("선호", 10).await.unwrap();
        assert_eq!(hits.len(), 1);

        assert!(store.search("없는말", 10).await.unwrap().is_empty());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn decision_store_latest_wins_sorted_by_priority() {
        let dir = tmp_dir();
        let store = FileDecisionStore::new(dir.join("decisions.jsonl"));

        store
            .set(DecisionRecord {
                name: "deploy-window".into(),
                value: "주중만".into(),
                priority: 5,
                at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .set(DecisionRecord {
                name: "deploy-window".into(),
                value: "언제든".into(),
                priority: 5,
                at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .set(DecisionRecord {
                name: "tone".into(),
                value: "존댓말".into(),
                priority: 9,
                at: Utc::now(),
            })
            .await
            .unwrap();

        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "tone");
        assert_eq!(
            store.get("deploy-window").await.unwrap().unwrap().value,
            "언제든"
        );

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn promise_store_lists_newest_first() {
        let dir = tmp_dir();
        let store = FilePromiseStore::new(dir.join("promises.jsonl"));

        store
            .add(PromiseRecord {
                id: "p1".into(),
                text: "first".into(),
                to: "U1".into(),
                at: Utc::now() - chrono::Duration::minutes(5),
                done: false,
            })
            .await
            .unwrap();
        store
            .add(PromiseRecord {
                id: "p2".into(),
                text: "second".into(),
                to: "U1".into(),
                at: Utc::now(),
                done: false,
            })
            .await
            .unwrap();

        let list = store.list().await.unwrap();
        assert_eq!(list[0].id, "p2");
        assert_eq!(list[1].id, "p1");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
