//! Conversation orchestration core.
//!
//! The in-process message bus, the inbound routing pipeline, the agent and
//! task loop state machines, approval mediation, the outbound dispatcher
//! with retry/dedupe/DLQ, session recording, and the workflow event log.
//! Chat transports, LLM providers, and the persistent stores are external
//! collaborators reached through traits.

pub mod agent;
pub mod approval;
pub mod bus;
pub mod commands;
pub mod dedupe;
pub mod dispatch;
pub mod dlq;
pub mod events;
pub mod orchestrator;
pub mod render;
pub mod router;
pub mod session;
pub mod stores;
pub mod task_loop;
pub mod tools;
pub mod vault;

pub use bus::MessageBus;
