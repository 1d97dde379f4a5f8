//! Channel transport interface and registry.
//!
//! A [`ChannelTransport`] is the bidirectional connection to one chat
//! provider (Slack, Discord, Telegram). Transports are external to the
//! orchestration core; this crate defines their contract and the
//! [`ChannelRegistry`] that owns their lifecycle and routes calls by
//! provider name.

pub mod registry;
pub mod traits;

pub use registry::ChannelRegistry;
pub use traits::{ChannelTransport, CommandDescriptor, MessageId, Mention, ReadTarget};
