//! JSONL append-only persistence for cron jobs.
//!
//! Events are appended as newline-delimited JSON and replayed on load to
//! reconstruct the active job set. Invalid lines are skipped with a
//! warning so one corrupt write never loses the store.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use murmur_types::Result;
use murmur_types::cron::CronJob;

/// Event types stored in the JSONL log.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StorageEvent {
    /// A job was created or its full row replaced.
    Upsert { job: CronJob },
    /// A job was deleted.
    Delete { job_id: String },
}

/// JSONL storage for cron job events.
pub struct CronStorage {
    path: PathBuf,
}

impl CronStorage {
    /// Create a storage instance backed by the given file path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append an upsert event for the full job row.
    pub async fn append_upsert(&self, job: &CronJob) -> Result<()> {
        self.append_event(&StorageEvent::Upsert { job: job.clone() })
            .await
    }

    /// Append a deletion event.
    pub async fn append_delete(&self, job_id: &str) -> Result<()> {
        self.append_event(&StorageEvent::Delete {
            job_id: job_id.to_owned(),
        })
        .await
    }

    /// Replay the event log into the current set of active jobs.
    pub async fn load_jobs(&self) -> Result<Vec<CronJob>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let mut jobs = HashMap::<String, CronJob>::new();

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<StorageEvent>(line) {
                Ok(StorageEvent::Upsert { job }) => {
                    jobs.insert(job.id.clone(), job);
                }
                Ok(StorageEvent::Delete { job_id }) => {
                    jobs.remove(&job_id);
                }
                Err(e) => {
                    warn!(line = line_no + 1, error = %e, "skipping invalid JSONL line");
                }
            }
        }
        Ok(jobs.into_values().collect())
    }

    async fn append_event(&self, event: &StorageEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_types::cron::{CronJobState, CronPayload, CronSchedule};

    fn tmp_path() -> PathBuf {
        std::env::temp_dir().join(format!("murmur-cron-{}.jsonl", uuid::Uuid::new_v4()))
    }

    fn job(id: &str) -> CronJob {
        CronJob {
            id: id.into(),
            name: format!("job {id}"),
            enabled: true,
            schedule: CronSchedule::every(60_000),
            payload: CronPayload::default(),
            state: CronJobState::default(),
            created_at_ms: 0,
            updated_at_ms: 0,
            delete_after_run: false,
        }
    }

    #[tokio::test]
    async fn upsert_and_load() {
        let path = tmp_path();
        let storage = CronStorage::new(path.clone());

        storage.append_upsert(&job("j1")).await.unwrap();
        let jobs = storage.load_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "j1");

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn later_upsert_wins() {
        let path = tmp_path();
        let storage = CronStorage::new(path.clone());

        storage.append_upsert(&job("j1")).await.unwrap();
        let mut updated = job("j1");
        updated.enabled = false;
        storage.append_upsert(&updated).await.unwrap();

        let jobs = storage.load_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(!jobs[0].enabled);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn delete_removes_on_replay() {
        let path = tmp_path();
        let storage = CronStorage::new(path.clone());

        storage.append_upsert(&job("j1")).await.unwrap();
        storage.append_upsert(&job("j2")).await.unwrap();
        storage.append_delete("j1").await.unwrap();

        let jobs = storage.load_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "j2");

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn invalid_lines_are_skipped() {
        let path = tmp_path();
        let storage = CronStorage::new(path.clone());
        storage.append_upsert(&job("good")).await.unwrap();

        let mut content = tokio::fs::read_to_string(&path).await.unwrap();
        content.push_str("garbage line\n");
        tokio::fs::write(&path, content).await.unwrap();

        let jobs = storage.load_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let storage = CronStorage::new(tmp_path());
        assert!(storage.load_jobs().await.unwrap().is_empty());
    }
}
