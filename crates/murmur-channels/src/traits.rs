//! Channel transport trait definitions.

use async_trait::async_trait;

use murmur_types::error::ChannelError;
use murmur_types::event::{InboundMessage, OutboundMessage};

/// How many parent threads a transport merges replies from per poll.
///
/// Fixed, independent of the read limit.
pub const THREAD_MERGE_PARENTS: usize = 5;

/// Provider-native identifier of a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

/// An agent mention extracted from message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    /// Normalized alias the mention addresses.
    pub alias: String,
    /// The raw mention text as it appeared.
    pub raw: String,
}

/// A slash-command descriptor for best-effort platform registration.
#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    /// Command name without the leading slash.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Usage hint shown by the platform, when supported.
    pub usage: String,
}

/// A chat target to poll.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReadTarget {
    /// Chat id to read from.
    pub chat_id: String,
}

/// The contract every chat transport satisfies.
///
/// All operations are fallible; `read` returns an empty batch on failure
/// so the poll loop never stalls on one provider. Callers set `reply_to`
/// per the provider's threading convention (Slack `thread_ts`, Discord
/// message id, Telegram empty).
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Provider name (`"slack"`, `"discord"`, `"telegram"`).
    fn name(&self) -> &str;

    /// The provider-side id of the bot account, when known.
    /// Used by the ignore filter to drop the bot's own echoes.
    fn bot_user_id(&self) -> Option<String> {
        None
    }

    /// Chats this transport should be polled for.
    fn read_targets(&self) -> Vec<ReadTarget>;

    /// Connect / authenticate. A failed start propagates to the caller.
    async fn start(&self) -> Result<(), ChannelError>;

    /// Disconnect and release resources.
    async fn stop(&self) -> Result<(), ChannelError>;

    /// Send an outbound message, returning the provider-native id.
    async fn send(&self, msg: &OutboundMessage) -> Result<MessageId, ChannelError>;

    /// Read up to `limit` recent messages from `chat_id`, thread replies
    /// merged by timestamp (up to [`THREAD_MERGE_PARENTS`] parents).
    async fn read(&self, chat_id: &str, limit: usize) -> Vec<InboundMessage>;

    /// Edit a previously sent message in place.
    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), ChannelError>;

    /// Add a reaction to a message.
    async fn add_reaction(
        &self,
        chat_id: &str,
        message_id: &str,
        reaction: &str,
    ) -> Result<(), ChannelError>;

    /// Remove a reaction from a message.
    async fn remove_reaction(
        &self,
        chat_id: &str,
        message_id: &str,
        reaction: &str,
    ) -> Result<(), ChannelError>;

    /// Toggle the typing indicator.
    async fn set_typing(
        &self,
        chat_id: &str,
        typing: bool,
        anchor_message_id: Option<&str>,
    ) -> Result<(), ChannelError>;

    /// Extract agent mentions from message text, provider syntax aware.
    fn parse_agent_mentions(&self, content: &str) -> Vec<Mention>;

    /// Best-effort registration of the slash-command catalogue.
    async fn sync_commands(&self, _commands: &[CommandDescriptor]) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mention_equality() {
        let a = Mention {
            alias: "claude".into(),
            raw: "@claude".into(),
        };
        let b = Mention {
            alias: "claude".into(),
            raw: "@claude".into(),
        };
        assert_eq!(a, b);
    }

    #[test]
    fn message_id_hashes() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(MessageId("m1".into()));
        assert!(set.contains(&MessageId("m1".into())));
        assert!(!set.contains(&MessageId("m2".into())));
    }

    #[test]
    fn thread_merge_depth_is_fixed() {
        assert_eq!(THREAD_MERGE_PARENTS, 5);
    }
}
