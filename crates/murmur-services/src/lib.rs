//! Long-running services for murmur.
//!
//! The cron scheduler (persistent jobs re-entering the agent loop on a
//! wall-clock schedule) and the file-backed implementations of the
//! core's store traits.

pub mod cron_service;
pub mod stores;

pub use cron_service::{CronService, JobRunner};
