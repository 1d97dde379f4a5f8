//! Cron scheduling service.
//!
//! Persists jobs through JSONL storage, ticks on a fixed interval, and
//! fires due jobs: `system_event` payloads deliver straight to the
//! target chat, `agent_turn` payloads drive a fresh agent loop through
//! the [`JobRunner`] seam. A job is never entered while its `running`
//! flag is set; flags are cleared on restart and jobs whose fire time
//! passed while the process was down get exactly one catch-up run.

pub mod scheduler;
pub mod storage;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use murmur_core::bus::MessageBus;
use murmur_core::commands::CronControl;
use murmur_types::Result;
use murmur_types::cron::{CronJob, CronJobState, CronPayload, CronSchedule, JobStatus, PayloadKind};
use murmur_types::event::{MessageKind, OutboundMessage};

use scheduler::{CronScheduler, initial_run_ms, next_run_ms, validate_schedule};
use storage::CronStorage;

/// Drives one agent turn for an `agent_turn` job.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run the job's message as a fresh agent objective, returning the
    /// final text output.
    async fn run_agent_turn(&self, job: &CronJob) -> std::result::Result<String, String>;
}

/// Cron scheduler settings taken from the global config.
#[derive(Debug, Clone)]
pub struct CronServiceConfig {
    /// Tick interval in milliseconds.
    pub tick_ms: u64,
    /// Grace window before a stuck running job re-fires.
    pub stuck_grace_ms: i64,
    /// Fallback `(provider, chat_id)` when a payload names no target.
    pub default_target: Option<(String, String)>,
}

impl Default for CronServiceConfig {
    fn default() -> Self {
        Self {
            tick_ms: 5_000,
            stuck_grace_ms: 10 * 60 * 1_000,
            default_target: None,
        }
    }
}

/// The cron service.
pub struct CronService {
    scheduler: RwLock<CronScheduler>,
    storage: CronStorage,
    bus: Arc<MessageBus>,
    runner: Arc<dyn JobRunner>,
    config: CronServiceConfig,
}

impl CronService {
    /// Load persisted jobs and build the service.
    ///
    /// Restart semantics: `running` flags are cleared, missing next-run
    /// times recomputed; a past fire time stays put so the first tick
    /// runs one catch-up.
    pub async fn new(
        storage_path: std::path::PathBuf,
        bus: Arc<MessageBus>,
        runner: Arc<dyn JobRunner>,
        config: CronServiceConfig,
    ) -> Result<Arc<Self>> {
        let storage = CronStorage::new(storage_path);
        let mut scheduler = CronScheduler::new();
        let now_ms = Utc::now().timestamp_millis();

        for mut job in storage.load_jobs().await? {
            job.state.running = false;
            job.state.running_started_at_ms = None;
            if job.state.next_run_at_ms.is_none() {
                match initial_run_ms(&job.schedule, now_ms) {
                    Ok(next) => job.state.next_run_at_ms = next,
                    Err(e) => {
                        warn!(job_id = %job.id, error = %e, "skipping job with bad schedule");
                        continue;
                    }
                }
            }
            if let Err(e) = scheduler.add_job(job) {
                warn!(error = %e, "skipping invalid persisted job");
            }
        }

        Ok(Arc::new(Self {
            scheduler: RwLock::new(scheduler),
            storage,
            bus,
            runner,
            config,
        }))
    }

    /// Create a job. Returns the generated id.
    pub async fn add_job(
        &self,
        name: String,
        schedule: CronSchedule,
        payload: CronPayload,
        delete_after_run: bool,
    ) -> Result<String> {
        validate_schedule(&schedule)
            .map_err(|e| murmur_types::MurmurError::Validation(e.to_string()))?;

        let now_ms = Utc::now().timestamp_millis();
        let next = initial_run_ms(&schedule, now_ms)
            .map_err(|e| murmur_types::MurmurError::Validation(e.to_string()))?;

        let job = CronJob {
            id: format!("job-{}", uuid::Uuid::new_v4()),
            name,
            enabled: true,
            schedule,
            payload,
            state: CronJobState {
                next_run_at_ms: next,
                ..Default::default()
            },
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            delete_after_run,
        };

        self.scheduler
            .write()
            .await
            .add_job(job.clone())
            .map_err(|e| murmur_types::MurmurError::Validation(e.to_string()))?;
        self.storage.append_upsert(&job).await?;

        info!(job_id = %job.id, name = %job.name, "cron job added");
        Ok(job.id)
    }

    /// Remove a job. Returns whether it existed.
    pub async fn remove_job(&self, job_id: &str) -> Result<bool> {
        let existed = self.scheduler.write().await.remove_job(job_id);
        if existed {
            self.storage.append_delete(job_id).await?;
            info!(job_id, "cron job removed");
        }
        Ok(existed)
    }

    /// Enable or disable a job.
    pub async fn enable_job(&self, job_id: &str, enabled: bool) -> Result<bool> {
        let snapshot = {
            let mut scheduler = self.scheduler.write().await;
            let Some(job) = scheduler.get_job_mut(job_id) else {
                return Ok(false);
            };
            job.enabled = enabled;
            job.updated_at_ms = Utc::now().timestamp_millis();
            job.clone()
        };
        self.storage.append_upsert(&snapshot).await?;
        Ok(true)
    }

    /// All jobs.
    pub async fn list_jobs(&self) -> Vec<CronJob> {
        self.scheduler.read().await.list_jobs()
    }

    /// Run until cancelled, firing due jobs each tick.
    pub async fn start(self: Arc<Self>, cancel: CancellationToken) {
        info!(tick_ms = self.config.tick_ms, "cron service started");
        let interval = std::time::Duration::from_millis(self.config.tick_ms);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("cron service shutting down");
                    return;
                }
                _ = tokio::time::sleep(interval) => {
                    self.tick().await;
                }
            }
        }
    }

    /// One scheduler pass: claim each due job, run it, record the
    /// outcome, and advance or retire its schedule.
    pub async fn tick(&self) {
        let now_ms = Utc::now().timestamp_millis();
        let due = self
            .scheduler
            .read()
            .await
            .due_jobs(now_ms, self.config.stuck_grace_ms);

        for job in due {
            // Claim the running flag atomically; a concurrent claim loses.
            let claimed = {
                let mut scheduler = self.scheduler.write().await;
                match scheduler.get_job_mut(&job.id) {
                    Some(live) if !live.state.running => {
                        live.state.running = true;
                        live.state.running_started_at_ms = Some(now_ms);
                        Some(live.clone())
                    }
                    _ => None,
                }
            };
            let Some(job) = claimed else {
                debug!(job_id = %job.id, "job already claimed");
                continue;
            };

            debug!(job_id = %job.id, name = %job.name, "firing cron job");
            let outcome = self.run_job(&job).await;
            self.settle_job(&job.id, now_ms, outcome).await;
        }
    }

    async fn run_job(&self, job: &CronJob) -> std::result::Result<(), String> {
        let target = self.job_target(job);

        match job.payload.kind {
            PayloadKind::SystemEvent => {
                if job.payload.deliver {
                    let Some((provider, chat_id)) = target else {
                        return Err("no delivery target".into());
                    };
                    let content = format!("⏰ {}\n{}", job.name, job.payload.message);
                    let mut msg =
                        OutboundMessage::new(provider, chat_id, content, MessageKind::CronEvent);
                    msg.sender_id = "cron".into();
                    self.bus.publish_outbound(msg);
                }
                Ok(())
            }
            PayloadKind::AgentTurn => match self.runner.run_agent_turn(job).await {
                Ok(output) => {
                    let Some((provider, chat_id)) = target else {
                        return Ok(());
                    };
                    if output.trim().is_empty() {
                        let mut msg = OutboundMessage::new(
                            provider,
                            chat_id,
                            format!("✅ cron 작업 완료: {}", job.name),
                            MessageKind::CronResult,
                        );
                        msg.sender_id = "cron".into();
                        msg.metadata.empty = true;
                        self.bus.publish_outbound(msg);
                    } else if job.payload.deliver {
                        let mut msg = OutboundMessage::new(
                            provider,
                            chat_id,
                            output,
                            MessageKind::CronResult,
                        );
                        msg.sender_id = "cron".into();
                        self.bus.publish_outbound(msg);
                    }
                    Ok(())
                }
                Err(e) => {
                    if let Some((provider, chat_id)) = target {
                        let mut msg = OutboundMessage::new(
                            provider,
                            chat_id,
                            format!("🔴 cron 작업 실패: {} ({e})", job.name),
                            MessageKind::CronFailed,
                        );
                        msg.sender_id = "cron".into();
                        self.bus.publish_outbound(msg);
                    }
                    Err(e)
                }
            },
        }
    }

    async fn settle_job(
        &self,
        job_id: &str,
        fired_ms: i64,
        outcome: std::result::Result<(), String>,
    ) {
        let mut remove = false;
        let snapshot = {
            let mut scheduler = self.scheduler.write().await;
            let Some(job) = scheduler.get_job_mut(job_id) else {
                return;
            };

            job.state.running = false;
            job.state.running_started_at_ms = None;
            job.state.last_run_at_ms = Some(fired_ms);
            job.updated_at_ms = Utc::now().timestamp_millis();
            match &outcome {
                Ok(()) => {
                    job.state.last_status = Some(JobStatus::Ok);
                    job.state.last_error = None;
                }
                Err(e) => {
                    error!(job_id, error = %e, "cron job failed");
                    job.state.last_status = Some(JobStatus::Error);
                    job.state.last_error = Some(e.clone());
                }
            }

            match next_run_ms(&job.schedule, fired_ms) {
                Ok(Some(next)) => job.state.next_run_at_ms = Some(next),
                Ok(None) => {
                    job.state.next_run_at_ms = None;
                    remove = job.delete_after_run;
                }
                Err(e) => {
                    warn!(job_id, error = %e, "next-run computation failed");
                    job.state.next_run_at_ms = None;
                }
            }
            job.clone()
        };

        if remove {
            self.scheduler.write().await.remove_job(job_id);
            if let Err(e) = self.storage.append_delete(job_id).await {
                warn!(job_id, error = %e, "cron delete persist failed");
            }
            info!(job_id, "one-shot job removed after run");
        } else if let Err(e) = self.storage.append_upsert(&snapshot).await {
            warn!(job_id, error = %e, "cron state persist failed");
        }
    }

    fn job_target(&self, job: &CronJob) -> Option<(String, String)> {
        match (&job.payload.channel, &job.payload.to) {
            (Some(provider), Some(chat_id)) => Some((provider.clone(), chat_id.clone())),
            _ => self.config.default_target.clone(),
        }
    }
}

#[async_trait]
impl CronControl for CronService {
    async fn add(
        &self,
        name: String,
        schedule: CronSchedule,
        payload: CronPayload,
        delete_after_run: bool,
    ) -> std::result::Result<String, String> {
        self.add_job(name, schedule, payload, delete_after_run)
            .await
            .map_err(|e| e.to_string())
    }

    async fn remove(&self, id: &str) -> bool {
        self.remove_job(id).await.unwrap_or(false)
    }

    async fn list(&self) -> Vec<CronJob> {
        self.list_jobs().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedRunner {
        output: Mutex<std::result::Result<String, String>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn returning(output: &str) -> Arc<Self> {
            Arc::new(Self {
                output: Mutex::new(Ok(output.to_owned())),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(error: &str) -> Arc<Self> {
            Arc::new(Self {
                output: Mutex::new(Err(error.to_owned())),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl JobRunner for ScriptedRunner {
        async fn run_agent_turn(&self, job: &CronJob) -> std::result::Result<String, String> {
            self.calls.lock().unwrap().push(job.id.clone());
            self.output.lock().unwrap().clone()
        }
    }

    fn tmp_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("murmur-cron-svc-{}.jsonl", uuid::Uuid::new_v4()))
    }

    async fn service(
        runner: Arc<dyn JobRunner>,
    ) -> (Arc<CronService>, Arc<MessageBus>, std::path::PathBuf) {
        let bus = MessageBus::new();
        let path = tmp_path();
        let config = CronServiceConfig {
            default_target: Some(("slack".into(), "C1".into())),
            ..Default::default()
        };
        let svc = CronService::new(path.clone(), bus.clone(), runner, config)
            .await
            .unwrap();
        (svc, bus, path)
    }

    fn past_at_payload(deliver: bool) -> (CronSchedule, CronPayload) {
        (
            CronSchedule::at(Utc::now().timestamp_millis() - 1_000),
            CronPayload {
                kind: PayloadKind::AgentTurn,
                message: "do the thing".into(),
                deliver,
                channel: None,
                to: None,
            },
        )
    }

    #[tokio::test]
    async fn system_event_delivers_formatted_message() {
        let runner = ScriptedRunner::returning("unused");
        let (svc, bus, path) = service(runner).await;

        let schedule = CronSchedule::at(Utc::now().timestamp_millis() - 1_000);
        svc.add_job(
            "아침 점검".into(),
            schedule,
            CronPayload {
                kind: PayloadKind::SystemEvent,
                message: "서버 상태를 확인하세요".into(),
                deliver: true,
                channel: Some("slack".into()),
                to: Some("C9".into()),
            },
            false,
        )
        .await
        .unwrap();

        svc.tick().await;

        let out = bus
            .consume_outbound(Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(out.metadata.kind, Some(MessageKind::CronEvent));
        assert_eq!(out.chat_id, "C9");
        assert_eq!(out.content, "⏰ 아침 점검\n서버 상태를 확인하세요");

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn empty_agent_output_publishes_fallback_and_one_shot_is_removed() {
        let runner = ScriptedRunner::returning("   ");
        let (svc, bus, path) = service(runner.clone()).await;

        let (schedule, payload) = past_at_payload(false);
        let id = svc
            .add_job("보고".into(), schedule, payload, true)
            .await
            .unwrap();

        svc.tick().await;

        let out = bus
            .consume_outbound(Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(out.metadata.kind, Some(MessageKind::CronResult));
        assert!(out.metadata.empty);
        assert!(out.content.to_lowercase().contains("cron 작업 완료"));

        assert_eq!(runner.calls.lock().unwrap().as_slice(), [id.as_str()]);
        assert!(svc.list_jobs().await.is_empty(), "delete_after_run one-shot");

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn failed_agent_turn_records_error_and_publishes_cron_failed() {
        let runner = ScriptedRunner::failing("provider exploded");
        let (svc, bus, path) = service(runner).await;

        let (schedule, payload) = past_at_payload(true);
        let id = svc
            .add_job("깨짐".into(), schedule, payload, false)
            .await
            .unwrap();

        svc.tick().await;

        let out = bus
            .consume_outbound(Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(out.metadata.kind, Some(MessageKind::CronFailed));
        assert!(out.content.contains("provider exploded"));

        let jobs = svc.list_jobs().await;
        let job = jobs.iter().find(|j| j.id == id).unwrap();
        assert_eq!(job.state.last_status, Some(JobStatus::Error));
        assert_eq!(job.state.last_error.as_deref(), Some("provider exploded"));
        assert!(!job.state.running);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn delivered_output_goes_to_payload_target() {
        let runner = ScriptedRunner::returning("일일 보고 완료");
        let (svc, bus, path) = service(runner).await;

        let schedule = CronSchedule::at(Utc::now().timestamp_millis() - 1_000);
        svc.add_job(
            "보고".into(),
            schedule,
            CronPayload {
                kind: PayloadKind::AgentTurn,
                message: "보고서 작성".into(),
                deliver: true,
                channel: Some("telegram".into()),
                to: Some("55".into()),
            },
            false,
        )
        .await
        .unwrap();

        svc.tick().await;

        let out = bus
            .consume_outbound(Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(out.provider, "telegram");
        assert_eq!(out.chat_id, "55");
        assert_eq!(out.content, "일일 보고 완료");

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn every_schedule_advances_from_fire_time() {
        let runner = ScriptedRunner::returning("ok");
        let (svc, _bus, path) = service(runner.clone()).await;

        let mut schedule = CronSchedule::every(60_000);
        schedule.at_ms = Some(Utc::now().timestamp_millis() - 1_000);
        let id = svc
            .add_job(
                "반복".into(),
                schedule,
                CronPayload {
                    kind: PayloadKind::AgentTurn,
                    message: "ping".into(),
                    deliver: false,
                    channel: None,
                    to: None,
                },
                false,
            )
            .await
            .unwrap();

        svc.tick().await;
        assert_eq!(runner.calls.lock().unwrap().len(), 1);

        let jobs = svc.list_jobs().await;
        let job = jobs.iter().find(|j| j.id == id).unwrap();
        let next = job.state.next_run_at_ms.unwrap();
        assert!(next > Utc::now().timestamp_millis());

        // Not due again until the interval elapses.
        svc.tick().await;
        assert_eq!(runner.calls.lock().unwrap().len(), 1);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn restart_clears_running_and_fires_one_catch_up() {
        let runner = ScriptedRunner::returning("caught up");
        let bus = MessageBus::new();
        let path = tmp_path();
        let config = CronServiceConfig {
            default_target: Some(("slack".into(), "C1".into())),
            ..Default::default()
        };

        // Simulate a crash: a persisted job still marked running with a
        // past fire time.
        {
            let storage = CronStorage::new(path.clone());
            let job = CronJob {
                id: "job-stale".into(),
                name: "stale".into(),
                enabled: true,
                schedule: CronSchedule::at(Utc::now().timestamp_millis() - 60_000),
                payload: CronPayload {
                    kind: PayloadKind::AgentTurn,
                    message: "catch up".into(),
                    deliver: true,
                    channel: None,
                    to: None,
                },
                state: CronJobState {
                    next_run_at_ms: Some(Utc::now().timestamp_millis() - 60_000),
                    running: true,
                    running_started_at_ms: Some(Utc::now().timestamp_millis() - 120_000),
                    ..Default::default()
                },
                created_at_ms: 0,
                updated_at_ms: 0,
                delete_after_run: true,
            };
            storage.append_upsert(&job).await.unwrap();
        }

        let svc = CronService::new(path.clone(), bus.clone(), runner.clone(), config)
            .await
            .unwrap();
        let jobs = svc.list_jobs().await;
        assert!(!jobs[0].state.running, "running flag cleared on restart");

        svc.tick().await;
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
        assert!(svc.list_jobs().await.is_empty(), "one-shot removed after catch-up");

        // A second tick must not re-fire.
        svc.tick().await;
        assert_eq!(runner.calls.lock().unwrap().len(), 1);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn add_job_validates_schedule() {
        let runner = ScriptedRunner::returning("ok");
        let (svc, _bus, path) = service(runner).await;

        let result = svc
            .add_job(
                "bad".into(),
                CronSchedule::cron("junk", None),
                CronPayload::default(),
                false,
            )
            .await;
        assert!(result.is_err());

        let _ = tokio::fs::remove_file(&path).await;
    }
}
