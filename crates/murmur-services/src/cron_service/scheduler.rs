//! In-memory job table and next-run computation.
//!
//! Holds the live [`CronJob`] map and answers which jobs are due. A job
//! is due when it is enabled, not `running` (a run stuck past the grace
//! window becomes eligible again), and its `next_run_at_ms` is at or
//! before now. Next-run times come from the schedule kind: `at` is
//! one-shot, `every` adds its interval to the last fire, `cron` parses a
//! 5-field expression in the job's timezone.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use murmur_types::cron::{CronJob, CronSchedule, ScheduleKind};

/// Error raised for malformed schedules.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// The cron expression failed to parse.
    #[error("invalid cron expression: {0}")]
    InvalidExpression(String),

    /// The schedule kind is missing its required field.
    #[error("incomplete schedule: {0}")]
    Incomplete(&'static str),

    /// The timezone name is unknown.
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
}

/// In-memory scheduler holding all jobs.
pub struct CronScheduler {
    jobs: HashMap<String, CronJob>,
}

impl CronScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
        }
    }

    /// Insert a job after validating its schedule.
    pub fn add_job(&mut self, job: CronJob) -> Result<(), ScheduleError> {
        validate_schedule(&job.schedule)?;
        self.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Remove a job by id. Returns whether it existed.
    pub fn remove_job(&mut self, job_id: &str) -> bool {
        self.jobs.remove(job_id).is_some()
    }

    /// Jobs due at `now_ms`: enabled, not running (or stuck past the
    /// grace window), with `next_run_at_ms <= now_ms`.
    pub fn due_jobs(&self, now_ms: i64, stuck_grace_ms: i64) -> Vec<CronJob> {
        self.jobs
            .values()
            .filter(|j| {
                if !j.enabled {
                    return false;
                }
                if j.state.running {
                    let stuck = j
                        .state
                        .running_started_at_ms
                        .is_some_and(|started| now_ms - started > stuck_grace_ms);
                    if !stuck {
                        return false;
                    }
                }
                j.state.next_run_at_ms.is_some_and(|next| next <= now_ms)
            })
            .cloned()
            .collect()
    }

    /// All jobs.
    pub fn list_jobs(&self) -> Vec<CronJob> {
        let mut jobs: Vec<CronJob> = self.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));
        jobs
    }

    /// Job by id.
    pub fn get_job(&self, job_id: &str) -> Option<&CronJob> {
        self.jobs.get(job_id)
    }

    /// Mutable job by id.
    pub fn get_job_mut(&mut self, job_id: &str) -> Option<&mut CronJob> {
        self.jobs.get_mut(job_id)
    }
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a schedule without computing anything.
pub fn validate_schedule(schedule: &CronSchedule) -> Result<(), ScheduleError> {
    match schedule.kind {
        ScheduleKind::At => {
            schedule
                .at_ms
                .ok_or(ScheduleError::Incomplete("at_ms required for kind=at"))?;
        }
        ScheduleKind::Every => {
            let every = schedule
                .every_ms
                .ok_or(ScheduleError::Incomplete("every_ms required for kind=every"))?;
            if every <= 0 {
                return Err(ScheduleError::Incomplete("every_ms must be positive"));
            }
        }
        ScheduleKind::Cron => {
            let expr = schedule
                .expr
                .as_deref()
                .ok_or(ScheduleError::Incomplete("expr required for kind=cron"))?;
            Schedule::from_str(&normalize_expr(expr))
                .map_err(|e| ScheduleError::InvalidExpression(e.to_string()))?;
            if let Some(tz) = schedule.tz.as_deref() {
                tz.parse::<Tz>()
                    .map_err(|_| ScheduleError::UnknownTimezone(tz.to_owned()))?;
            }
        }
    }
    Ok(())
}

/// First fire time for a fresh job, in epoch millis.
pub fn initial_run_ms(schedule: &CronSchedule, now_ms: i64) -> Result<Option<i64>, ScheduleError> {
    match schedule.kind {
        ScheduleKind::At => Ok(schedule.at_ms),
        ScheduleKind::Every => {
            let every = schedule
                .every_ms
                .ok_or(ScheduleError::Incomplete("every_ms required for kind=every"))?;
            Ok(Some(schedule.at_ms.unwrap_or(now_ms + every)))
        }
        ScheduleKind::Cron => next_cron_ms(schedule, now_ms),
    }
}

/// Fire time following a run at `fired_ms`. `None` retires the job.
pub fn next_run_ms(schedule: &CronSchedule, fired_ms: i64) -> Result<Option<i64>, ScheduleError> {
    match schedule.kind {
        ScheduleKind::At => Ok(None),
        ScheduleKind::Every => {
            let every = schedule
                .every_ms
                .ok_or(ScheduleError::Incomplete("every_ms required for kind=every"))?;
            Ok(Some(fired_ms + every))
        }
        ScheduleKind::Cron => next_cron_ms(schedule, fired_ms),
    }
}

fn next_cron_ms(schedule: &CronSchedule, after_ms: i64) -> Result<Option<i64>, ScheduleError> {
    let expr = schedule
        .expr
        .as_deref()
        .ok_or(ScheduleError::Incomplete("expr required for kind=cron"))?;
    let parsed = Schedule::from_str(&normalize_expr(expr))
        .map_err(|e| ScheduleError::InvalidExpression(e.to_string()))?;
    let after: DateTime<Utc> = Utc
        .timestamp_millis_opt(after_ms)
        .single()
        .unwrap_or_else(Utc::now);

    match schedule.tz.as_deref() {
        Some(tz_name) => {
            let tz: Tz = tz_name
                .parse()
                .map_err(|_| ScheduleError::UnknownTimezone(tz_name.to_owned()))?;
            Ok(parsed
                .after(&after.with_timezone(&tz))
                .next()
                .map(|dt| dt.timestamp_millis()))
        }
        None => Ok(parsed.after(&after).next().map(|dt| dt.timestamp_millis())),
    }
}

/// Normalize a 5-field user expression to the 6-field form the parser
/// wants (seconds prepended). 6- and 7-field inputs pass through.
fn normalize_expr(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_types::cron::{CronJobState, CronPayload};

    fn job(id: &str, schedule: CronSchedule) -> CronJob {
        CronJob {
            id: id.into(),
            name: format!("job {id}"),
            enabled: true,
            schedule,
            payload: CronPayload::default(),
            state: CronJobState::default(),
            created_at_ms: 0,
            updated_at_ms: 0,
            delete_after_run: false,
        }
    }

    #[test]
    fn five_field_expressions_parse() {
        assert!(validate_schedule(&CronSchedule::cron("0 9 * * *", None)).is_ok());
        assert!(validate_schedule(&CronSchedule::cron("*/5 * * * 1-5", None)).is_ok());
        assert!(validate_schedule(&CronSchedule::cron("not a cron", None)).is_err());
    }

    #[test]
    fn unknown_timezone_rejected() {
        let schedule = CronSchedule::cron("0 9 * * *", Some("Mars/Olympus".into()));
        assert!(matches!(
            validate_schedule(&schedule),
            Err(ScheduleError::UnknownTimezone(_))
        ));
    }

    #[test]
    fn incomplete_schedules_rejected() {
        let mut schedule = CronSchedule::every(1000);
        schedule.every_ms = None;
        assert!(validate_schedule(&schedule).is_err());

        let mut at = CronSchedule::at(0);
        at.at_ms = None;
        assert!(validate_schedule(&at).is_err());
    }

    #[test]
    fn initial_run_for_each_kind() {
        let now = 1_700_000_000_000;

        assert_eq!(
            initial_run_ms(&CronSchedule::at(now + 5_000), now).unwrap(),
            Some(now + 5_000)
        );
        assert_eq!(
            initial_run_ms(&CronSchedule::every(60_000), now).unwrap(),
            Some(now + 60_000)
        );

        let mut offset = CronSchedule::every(60_000);
        offset.at_ms = Some(now + 10_000);
        assert_eq!(initial_run_ms(&offset, now).unwrap(), Some(now + 10_000));

        let next = initial_run_ms(&CronSchedule::cron("0 9 * * *", None), now)
            .unwrap()
            .unwrap();
        assert!(next > now);
    }

    #[test]
    fn next_run_for_each_kind() {
        let fired = 1_700_000_000_000;
        assert_eq!(next_run_ms(&CronSchedule::at(fired), fired).unwrap(), None);
        assert_eq!(
            next_run_ms(&CronSchedule::every(60_000), fired).unwrap(),
            Some(fired + 60_000)
        );
        let next = next_run_ms(&CronSchedule::cron("0 9 * * *", None), fired)
            .unwrap()
            .unwrap();
        assert!(next > fired);
    }

    #[test]
    fn cron_timezone_shifts_fire_time() {
        let now = 1_700_000_000_000;
        let utc = next_cron_ms(&CronSchedule::cron("0 9 * * *", None), now)
            .unwrap()
            .unwrap();
        let seoul = next_cron_ms(
            &CronSchedule::cron("0 9 * * *", Some("Asia/Seoul".into())),
            now,
        )
        .unwrap()
        .unwrap();
        assert_ne!(utc, seoul);
    }

    #[test]
    fn due_jobs_respect_enabled_running_and_time() {
        let mut sched = CronScheduler::new();
        let now = 1_700_000_000_000;

        let mut due = job("due", CronSchedule::every(1_000));
        due.state.next_run_at_ms = Some(now - 10);
        sched.add_job(due).unwrap();

        let mut future = job("future", CronSchedule::every(1_000));
        future.state.next_run_at_ms = Some(now + 60_000);
        sched.add_job(future).unwrap();

        let mut disabled = job("disabled", CronSchedule::every(1_000));
        disabled.enabled = false;
        disabled.state.next_run_at_ms = Some(now - 10);
        sched.add_job(disabled).unwrap();

        let mut running = job("running", CronSchedule::every(1_000));
        running.state.next_run_at_ms = Some(now - 10);
        running.state.running = true;
        running.state.running_started_at_ms = Some(now - 1_000);
        sched.add_job(running).unwrap();

        let due = sched.due_jobs(now, 600_000);
        let ids: Vec<&str> = due.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["due"]);
    }

    #[test]
    fn stuck_running_job_becomes_eligible_after_grace() {
        let mut sched = CronScheduler::new();
        let now = 1_700_000_000_000;

        let mut stuck = job("stuck", CronSchedule::every(1_000));
        stuck.state.next_run_at_ms = Some(now - 10);
        stuck.state.running = true;
        stuck.state.running_started_at_ms = Some(now - 2_000_000);
        sched.add_job(stuck).unwrap();

        assert!(sched.due_jobs(now, 600_000).iter().any(|j| j.id == "stuck"));
    }

    #[test]
    fn add_rejects_invalid_remove_reports_presence() {
        let mut sched = CronScheduler::new();
        assert!(sched.add_job(job("bad", CronSchedule::cron("junk", None))).is_err());
        sched.add_job(job("ok", CronSchedule::every(1_000))).unwrap();
        assert!(sched.remove_job("ok"));
        assert!(!sched.remove_job("ok"));
    }
}
