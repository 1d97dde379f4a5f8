//! [`ChannelRegistry`] -- transport lookup and lifecycle.
//!
//! Maps provider names to [`ChannelTransport`] instances and forwards
//! send/read/edit/reaction/typing calls to the right one. Lifecycle is
//! sequential: `start_all` starts transports in registration order and a
//! failed start propagates; `stop_all` keeps going and reports per-provider
//! results.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use murmur_types::error::ChannelError;
use murmur_types::event::{InboundMessage, OutboundMessage};

use crate::traits::{ChannelTransport, CommandDescriptor, MessageId};

/// Registry of channel transports keyed by provider name.
pub struct ChannelRegistry {
    transports: Vec<Arc<dyn ChannelTransport>>,
    by_name: HashMap<String, Arc<dyn ChannelTransport>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            transports: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Register a transport. A transport with the same name is replaced.
    pub fn register(&mut self, transport: Arc<dyn ChannelTransport>) {
        let name = transport.name().to_owned();
        info!(provider = %name, "registering channel transport");
        self.by_name.insert(name, transport.clone());
        self.transports
            .retain(|t| t.name() != transport.name());
        self.transports.push(transport);
    }

    /// Registered provider names, in registration order.
    pub fn providers(&self) -> Vec<String> {
        self.transports.iter().map(|t| t.name().to_owned()).collect()
    }

    /// Look up a transport by provider name.
    pub fn get(&self, provider: &str) -> Result<Arc<dyn ChannelTransport>, ChannelError> {
        self.by_name
            .get(provider)
            .cloned()
            .ok_or_else(|| ChannelError::NotRegistered(provider.to_owned()))
    }

    /// All transports, in registration order (for the poll loop).
    pub fn transports(&self) -> &[Arc<dyn ChannelTransport>] {
        &self.transports
    }

    /// Start every transport sequentially. The first failure propagates.
    pub async fn start_all(&self) -> Result<(), ChannelError> {
        for transport in &self.transports {
            info!(provider = %transport.name(), "starting transport");
            transport.start().await?;
        }
        Ok(())
    }

    /// Stop every transport sequentially, reporting per-provider results.
    pub async fn stop_all(&self) -> Vec<(String, Result<(), ChannelError>)> {
        let mut results = Vec::with_capacity(self.transports.len());
        for transport in &self.transports {
            let name = transport.name().to_owned();
            let result = transport.stop().await;
            if let Err(ref e) = result {
                warn!(provider = %name, error = %e, "transport stop failed");
            }
            results.push((name, result));
        }
        results
    }

    /// Forward a send to the provider's transport.
    pub async fn send(&self, msg: &OutboundMessage) -> Result<MessageId, ChannelError> {
        self.get(&msg.provider)?.send(msg).await
    }

    /// Forward a read; unknown providers read as an empty batch.
    pub async fn read(&self, provider: &str, chat_id: &str, limit: usize) -> Vec<InboundMessage> {
        match self.get(provider) {
            Ok(transport) => transport.read(chat_id, limit).await,
            Err(_) => Vec::new(),
        }
    }

    /// Forward an edit to the provider's transport.
    pub async fn edit_message(
        &self,
        provider: &str,
        chat_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), ChannelError> {
        self.get(provider)?
            .edit_message(chat_id, message_id, content)
            .await
    }

    /// Forward a reaction add.
    pub async fn add_reaction(
        &self,
        provider: &str,
        chat_id: &str,
        message_id: &str,
        reaction: &str,
    ) -> Result<(), ChannelError> {
        self.get(provider)?
            .add_reaction(chat_id, message_id, reaction)
            .await
    }

    /// Forward a reaction removal.
    pub async fn remove_reaction(
        &self,
        provider: &str,
        chat_id: &str,
        message_id: &str,
        reaction: &str,
    ) -> Result<(), ChannelError> {
        self.get(provider)?
            .remove_reaction(chat_id, message_id, reaction)
            .await
    }

    /// Forward a typing-indicator toggle.
    pub async fn set_typing(
        &self,
        provider: &str,
        chat_id: &str,
        typing: bool,
        anchor_message_id: Option<&str>,
    ) -> Result<(), ChannelError> {
        self.get(provider)?
            .set_typing(chat_id, typing, anchor_message_id)
            .await
    }

    /// Push the slash-command catalogue to every transport, best-effort.
    pub async fn sync_commands(&self, commands: &[CommandDescriptor]) {
        for transport in &self.transports {
            if let Err(e) = transport.sync_commands(commands).await {
                warn!(provider = %transport.name(), error = %e, "command sync failed");
            }
        }
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
