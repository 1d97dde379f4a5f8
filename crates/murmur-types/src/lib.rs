//! Shared types for the murmur conversation orchestrator.
//!
//! This crate has no runtime dependencies beyond serde/chrono and defines
//! the data model exchanged between the bus, router, loops, and services:
//! messages, approvals, tasks, cron jobs, workflow events, render profiles,
//! configuration, and the error taxonomy.

pub mod approval;
pub mod config;
pub mod cron;
pub mod error;
pub mod event;
pub mod render;
pub mod secret;
pub mod task;
pub mod workflow;

pub use error::{ChannelError, MurmurError, Result};
pub use event::{InboundMessage, MediaItem, MessageKind, MessageMetadata, OutboundMessage};
