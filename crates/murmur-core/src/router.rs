//! Inbound router.
//!
//! Two cooperating loops. The **poll loop** walks every transport's read
//! targets each tick, primes the seen-set on the first pass per target,
//! forwards platform-native approval reactions, and publishes fresh
//! messages in ascending timestamp order. The **consumer loop** drains
//! the inbound queue and runs one handler per message, bounded by the
//! configured concurrency.
//!
//! Handler pipeline per message: ignore filter → approval reply → slash
//! command → read-ack → mentions (with per-alias cooldown) → orchestrate.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use murmur_channels::ChannelRegistry;
use murmur_types::config::Config;
use murmur_types::event::{InboundMessage, MessageKind, OutboundMessage};

use crate::approval::ApprovalService;
use crate::bus::MessageBus;
use crate::commands::CommandRouter;
use crate::dedupe::SeenSet;
use crate::orchestrator::{Orchestrate, OrchestratorRequest};
use crate::render::{RenderProfiles, render_text};

/// Inbound seen-set TTL.
const SEEN_TTL_MS: i64 = 30 * 60 * 1_000;
/// Inbound seen-set capacity.
const SEEN_MAX: usize = 8_192;
/// Per-chat recent messages kept for thread-nearby context.
const RECENT_PER_CHAT: usize = 50;
/// Read-ack reaction name.
const ACK_REACTION: &str = "eyes";

/// Aliases that collapse to the default agent alias.
const DEFAULT_ALIAS_NAMES: &[&str] = &["claude", "claude-worker", "worker"];

/// The inbound router.
pub struct InboundRouter {
    bus: Arc<MessageBus>,
    registry: Arc<ChannelRegistry>,
    commands: Arc<CommandRouter>,
    approvals: Arc<ApprovalService>,
    orchestrator: Arc<dyn Orchestrate>,
    profiles: Arc<RenderProfiles>,
    config: Config,
    seen: SeenSet,
    cooldown: SeenSet,
    primed: Mutex<HashSet<String>>,
    recent: Mutex<HashMap<String, VecDeque<(Option<String>, String)>>>,
}

impl InboundRouter {
    /// Wire the router.
    pub fn new(
        bus: Arc<MessageBus>,
        registry: Arc<ChannelRegistry>,
        commands: Arc<CommandRouter>,
        approvals: Arc<ApprovalService>,
        orchestrator: Arc<dyn Orchestrate>,
        profiles: Arc<RenderProfiles>,
        config: Config,
    ) -> Arc<Self> {
        let cooldown = SeenSet::new(config.router.mention_cooldown_ms as i64, 1_024);
        Arc::new(Self {
            bus,
            registry,
            commands,
            approvals,
            orchestrator,
            profiles,
            config,
            seen: SeenSet::new(SEEN_TTL_MS, SEEN_MAX),
            cooldown,
            primed: Mutex::new(HashSet::new()),
            recent: Mutex::new(HashMap::new()),
        })
    }

    /// Run both loops until cancelled; in-flight handlers are awaited
    /// before the transports stop.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let poll = {
            let router = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { router.poll_loop(cancel).await })
        };
        let consume = {
            let router = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(router.consumer_loop(cancel))
        };
        let _ = poll.await;
        let _ = consume.await;
        self.registry.stop_all().await;
        info!("inbound router stopped");
    }

    async fn poll_loop(&self, cancel: CancellationToken) {
        info!("poll loop started");
        let interval = Duration::from_millis(self.config.router.poll_interval_ms);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            self.poll_once().await;
        }
    }

    /// One pass across every transport and target.
    pub async fn poll_once(&self) {
        for transport in self.registry.transports() {
            let provider = transport.name().to_owned();
            for target in transport.read_targets() {
                let batch = transport
                    .read(&target.chat_id, self.config.router.read_limit)
                    .await;
                self.ingest_batch(&provider, &target.chat_id, batch).await;
            }
        }
    }

    /// Publish a read batch, priming the seen-set on the first pass per
    /// target.
    pub async fn ingest_batch(
        &self,
        provider: &str,
        chat_id: &str,
        mut batch: Vec<InboundMessage>,
    ) {
        let target_key = format!("{provider}:{chat_id}").to_lowercase();
        let first_pass = self.primed.lock().expect("primed lock").insert(target_key);

        // Bot-authored rows carrying reactions resolve approvals even on
        // the priming pass.
        for msg in &batch {
            if msg.metadata.from_is_bot
                && let Some(reactions) = reaction_names(msg)
            {
                self.approvals
                    .handle_reaction(provider, chat_id, &msg.content, &reactions)
                    .await;
            }
        }

        if first_pass {
            for msg in &batch {
                self.seen.mark(&msg.seen_key());
            }
            debug!(provider, chat_id, count = batch.len(), "seen-set primed");
            return;
        }

        batch.sort_by_key(|m| m.at);
        for msg in batch {
            if !self.seen.check_and_mark(&msg.seen_key()) {
                continue;
            }
            self.bus.publish_inbound(msg);
        }
    }

    async fn consumer_loop(self: Arc<Self>, cancel: CancellationToken) {
        info!("consumer loop started");
        let cap = self.config.router.inbound_concurrency.max(1);
        let mut inflight: JoinSet<()> = JoinSet::new();

        loop {
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                msg = self.bus.consume_inbound(None) => msg,
            };
            let Some(msg) = msg else { break };

            while inflight.len() >= cap {
                let _ = inflight.join_next().await;
            }

            let router = self.clone();
            inflight.spawn(async move {
                router.handle_message(msg).await;
            });
        }

        // Shutdown: let in-flight handlers settle.
        while inflight.join_next().await.is_some() {}
    }

    /// The handler pipeline for one message.
    pub async fn handle_message(self: Arc<Self>, msg: InboundMessage) {
        if self.should_ignore(&msg) {
            debug!(sender = %msg.sender_id, "message ignored");
            return;
        }

        self.remember(&msg);

        // Approval replies bind before anything else.
        if self
            .approvals
            .handle_reply(&msg.provider, &msg.chat_id, &msg.content)
            .await
        {
            return;
        }

        // Slash commands.
        if self
            .commands
            .dispatch(
                &msg.provider,
                &msg.chat_id,
                &msg.sender_id,
                &msg.content,
                msg.metadata.message_id.as_deref(),
            )
            .await
        {
            return;
        }

        // Read-ack, best effort.
        if let Some(message_id) = msg.metadata.message_id.as_deref()
            && let Err(e) = self
                .registry
                .add_reaction(&msg.provider, &msg.chat_id, message_id, ACK_REACTION)
                .await
        {
            debug!(error = %e, "read-ack failed");
        }

        // Mentions.
        let aliases = self.extract_aliases(&msg);
        if !aliases.is_empty() {
            for alias in aliases {
                if !self.cooldown_ok(&msg.provider, &msg.chat_id, &alias) {
                    debug!(alias = %alias, "mention cooldown active");
                    continue;
                }
                self.orchestrate(&msg, &alias).await;
            }
            return;
        }

        // Auto-reply without a mention, when enabled and configured.
        if self.config.router.auto_reply
            && self.config.provider(&msg.provider).is_some()
        {
            let alias = self.config.default_alias.clone();
            if self.cooldown_ok(&msg.provider, &msg.chat_id, &alias) {
                self.orchestrate(&msg, &alias).await;
            }
        }
    }

    /// The ignore filter.
    pub fn should_ignore(&self, msg: &InboundMessage) -> bool {
        let sender = msg.sender_id.trim();
        if sender.is_empty() || sender.eq_ignore_ascii_case("unknown") {
            return true;
        }
        if sender.starts_with("subagent:") {
            return true;
        }
        if sender == "approval-bot" || sender == "recovery" {
            return true;
        }
        if msg.metadata.kind == Some(MessageKind::TaskRecovery) {
            return true;
        }
        if msg.metadata.from_is_bot {
            return true;
        }
        if let Ok(transport) = self.registry.get(&msg.provider)
            && transport.bot_user_id().as_deref() == Some(sender)
        {
            return true;
        }
        if let Some(subtype) = msg.metadata.extra.get("subtype").and_then(|v| v.as_str())
            && matches!(subtype, "bot_message" | "message_changed" | "message_deleted")
        {
            return true;
        }
        false
    }

    /// Aliases this message addresses, normalized to known agent names.
    fn extract_aliases(&self, msg: &InboundMessage) -> Vec<String> {
        let raw: Vec<String> = match &msg.metadata.mentions {
            Some(mentions) => mentions.clone(),
            None => match self.registry.get(&msg.provider) {
                Ok(transport) => transport
                    .parse_agent_mentions(&msg.content)
                    .into_iter()
                    .map(|m| m.alias)
                    .collect(),
                Err(_) => Vec::new(),
            },
        };

        let bot_id = self
            .registry
            .get(&msg.provider)
            .ok()
            .and_then(|t| t.bot_user_id());

        let mut aliases = Vec::new();
        for mention in raw {
            let lower = mention.to_lowercase();
            let alias = if DEFAULT_ALIAS_NAMES.contains(&lower.as_str())
                || bot_id.as_deref().is_some_and(|id| id.eq_ignore_ascii_case(&mention))
            {
                self.config.default_alias.clone()
            } else {
                lower
            };
            if !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }
        aliases
    }

    fn cooldown_ok(&self, provider: &str, chat_id: &str, alias: &str) -> bool {
        let key = format!("{provider}:{chat_id}:{alias}").to_lowercase();
        self.cooldown.check_and_mark(&key)
    }

    fn remember(&self, msg: &InboundMessage) {
        let key = format!("{}:{}", msg.provider, msg.chat_id).to_lowercase();
        let mut recent = self.recent.lock().expect("recent lock");
        let entries = recent.entry(key).or_default();
        entries.push_back((msg.thread_id.clone(), format!("{}: {}", msg.sender_id, msg.content)));
        while entries.len() > RECENT_PER_CHAT {
            entries.pop_front();
        }
    }

    fn thread_context(&self, msg: &InboundMessage) -> Vec<String> {
        let Some(thread_id) = msg.thread_id.as_deref() else {
            return Vec::new();
        };
        let key = format!("{}:{}", msg.provider, msg.chat_id).to_lowercase();
        let recent = self.recent.lock().expect("recent lock");
        recent
            .get(&key)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(t, _)| t.as_deref() == Some(thread_id))
                    .map(|(_, line)| line.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn orchestrate(&self, msg: &InboundMessage, alias: &str) {
        let request = OrchestratorRequest {
            provider: msg.provider.clone(),
            chat_id: msg.chat_id.clone(),
            thread_id: msg.thread_id.clone(),
            sender_id: msg.sender_id.clone(),
            alias: alias.to_owned(),
            text: msg.content.clone(),
            trigger_message_id: msg.metadata.message_id.clone(),
            thread_context: self.thread_context(msg),
            from_cron: false,
        };
        let reply = self.orchestrator.handle(request).await;

        if reply.suppress_reply || reply.reply.is_empty() {
            return;
        }

        let profile = self.profiles.get(&msg.provider, &msg.chat_id);
        let rendered = render_text(&reply.reply, &profile);
        let kind = if reply.error.is_some() {
            MessageKind::AgentError
        } else {
            MessageKind::AgentReply
        };

        let mut out = OutboundMessage::new(&msg.provider, &msg.chat_id, rendered, kind);
        out.sender_id = alias.to_owned();
        out.metadata.trigger_message_id = msg.metadata.message_id.clone();
        out.metadata.agent_alias = Some(alias.to_owned());
        out.thread_id = msg.thread_id.clone();
        out.reply_to = msg.metadata.message_id.clone();
        self.bus.publish_outbound(out);
    }
}

fn reaction_names(msg: &InboundMessage) -> Option<Vec<String>> {
    let values = msg.metadata.extra.get("reactions")?.as_array()?;
    let names: Vec<String> = values
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect();
    (!names.is_empty()).then_some(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::OrchestratorReply;
    use async_trait::async_trait;
    use chrono::Utc;
    use murmur_channels::traits::{ChannelTransport, Mention, MessageId, ReadTarget};
    use murmur_types::error::ChannelError;
    use murmur_types::event::MessageMetadata;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MentionTransport {
        reactions: AtomicUsize,
    }

    #[async_trait]
    impl ChannelTransport for MentionTransport {
        fn name(&self) -> &str {
            "slack"
        }
        fn bot_user_id(&self) -> Option<String> {
            Some("UBOT".into())
        }
        fn read_targets(&self) -> Vec<ReadTarget> {
            vec![ReadTarget {
                chat_id: "C1".into(),
            }]
        }
        async fn start(&self) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn send(&self, _msg: &OutboundMessage) -> Result<MessageId, ChannelError> {
            Ok(MessageId("m".into()))
        }
        async fn read(&self, _chat_id: &str, _limit: usize) -> Vec<InboundMessage> {
            Vec::new()
        }
        async fn edit_message(&self, _c: &str, _m: &str, _t: &str) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn add_reaction(&self, _c: &str, _m: &str, _r: &str) -> Result<(), ChannelError> {
            self.reactions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn remove_reaction(&self, _c: &str, _m: &str, _r: &str) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn set_typing(
            &self,
            _c: &str,
            _t: bool,
            _a: Option<&str>,
        ) -> Result<(), ChannelError> {
            Ok(())
        }
        fn parse_agent_mentions(&self, content: &str) -> Vec<Mention> {
            content
                .split_whitespace()
                .filter_map(|w| {
                    w.strip_prefix('@').map(|alias| Mention {
                        alias: alias.to_lowercase(),
                        raw: w.to_string(),
                    })
                })
                .collect()
        }
    }

    struct MockOrchestrator {
        calls: std::sync::Mutex<Vec<OrchestratorRequest>>,
        reply: OrchestratorReply,
    }

    impl MockOrchestrator {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: std::sync::Mutex::new(Vec::new()),
                reply: OrchestratorReply {
                    reply: text.into(),
                    ..Default::default()
                },
            })
        }
    }

    #[async_trait]
    impl Orchestrate for MockOrchestrator {
        async fn handle(&self, request: OrchestratorRequest) -> OrchestratorReply {
            self.calls.lock().unwrap().push(request);
            self.reply.clone()
        }
    }

    fn inbound(sender: &str, content: &str) -> InboundMessage {
        InboundMessage {
            id: format!("in-{}", uuid::Uuid::new_v4()),
            provider: "slack".into(),
            chat_id: "C1".into(),
            sender_id: sender.into(),
            content: content.into(),
            at: Utc::now(),
            thread_id: None,
            media: vec![],
            metadata: MessageMetadata {
                message_id: Some(format!("m-{}", uuid::Uuid::new_v4())),
                ..Default::default()
            },
        }
    }

    fn setup(
        orchestrator: Arc<dyn Orchestrate>,
        mut config: Config,
    ) -> (Arc<MessageBus>, Arc<InboundRouter>, Arc<MentionTransport>) {
        config
            .providers
            .entry("slack".into())
            .or_insert_with(|| murmur_types::config::ProviderConfig {
                bot_token: "token".into(),
                default_channel: "C1".into(),
            });

        let bus = MessageBus::new();
        let transport = Arc::new(MentionTransport {
            reactions: AtomicUsize::new(0),
        });
        let mut registry = ChannelRegistry::new();
        registry.register(transport.clone());
        let registry = Arc::new(registry);

        let profiles = Arc::new(RenderProfiles::new());
        let approvals = ApprovalService::new(bus.clone());
        let commands = Arc::new(CommandRouter::new(bus.clone(), profiles.clone(), vec![]));

        let router = InboundRouter::new(
            bus.clone(),
            registry,
            commands,
            approvals,
            orchestrator,
            profiles,
            config,
        );
        (bus, router, transport)
    }

    #[tokio::test]
    async fn ignore_filter_drops_noise() {
        let orchestrator = MockOrchestrator::replying("hi");
        let (_bus, router, _t) = setup(orchestrator.clone(), Config::default());

        for sender in ["", "unknown", "subagent:worker-1", "approval-bot", "recovery", "UBOT"] {
            assert!(router.should_ignore(&inbound(sender, "text")), "{sender}");
        }

        let mut bot = inbound("U1", "text");
        bot.metadata.from_is_bot = true;
        assert!(router.should_ignore(&bot));

        let mut recovery = inbound("U1", "text");
        recovery.metadata.kind = Some(MessageKind::TaskRecovery);
        assert!(router.should_ignore(&recovery));

        let mut subtype = inbound("U1", "text");
        subtype
            .metadata
            .extra
            .insert("subtype".into(), serde_json::json!("message_changed"));
        assert!(router.should_ignore(&subtype));

        assert!(!router.should_ignore(&inbound("U1", "text")));
    }

    #[tokio::test]
    async fn mention_routes_to_orchestrator_and_replies() {
        let orchestrator = MockOrchestrator::replying("안녕하세요");
        let (bus, router, transport) = setup(orchestrator.clone(), Config::default());

        let msg = inbound("U1", "@claude ping");
        let trigger = msg.metadata.message_id.clone();
        router.clone().handle_message(msg).await;

        let calls = orchestrator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].alias, "claude");
        drop(calls);

        let out = bus
            .consume_outbound(Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(out.metadata.kind, Some(MessageKind::AgentReply));
        assert_eq!(out.content, "안녕하세요");
        assert_eq!(out.metadata.trigger_message_id, trigger);
        // Read-ack was attempted.
        assert_eq!(transport.reactions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bot_id_mention_maps_to_default_alias() {
        let orchestrator = MockOrchestrator::replying("ok");
        let (_bus, router, _t) = setup(orchestrator.clone(), Config::default());

        router
            .clone()
            .handle_message(inbound("U1", "@UBOT do the thing"))
            .await;

        let calls = orchestrator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].alias, "claude");
    }

    #[tokio::test]
    async fn mention_cooldown_suppresses_rapid_repeat() {
        let orchestrator = MockOrchestrator::replying("ok");
        let (_bus, router, _t) = setup(orchestrator.clone(), Config::default());

        router
            .clone()
            .handle_message(inbound("U1", "@claude one"))
            .await;
        router
            .clone()
            .handle_message(inbound("U1", "@claude two"))
            .await;

        assert_eq!(orchestrator.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_mention_no_auto_reply_does_nothing() {
        let orchestrator = MockOrchestrator::replying("ok");
        let (_bus, router, _t) = setup(orchestrator.clone(), Config::default());

        router
            .clone()
            .handle_message(inbound("U1", "just chatting"))
            .await;
        assert!(orchestrator.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn auto_reply_uses_default_alias() {
        let orchestrator = MockOrchestrator::replying("ok");
        let mut config = Config::default();
        config.router.auto_reply = true;
        let (_bus, router, _t) = setup(orchestrator.clone(), config);

        router
            .clone()
            .handle_message(inbound("U1", "no mention here"))
            .await;

        let calls = orchestrator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].alias, "claude");
    }

    #[tokio::test]
    async fn ingest_primes_then_publishes_sorted() {
        let orchestrator = MockOrchestrator::replying("ok");
        let (bus, router, _t) = setup(orchestrator, Config::default());

        let old = {
            let mut m = inbound("U1", "old");
            m.at = Utc::now() - chrono::Duration::seconds(30);
            m
        };
        let new = inbound("U1", "new");

        // First pass primes; nothing is published.
        router
            .ingest_batch("slack", "C1", vec![old.clone()])
            .await;
        assert!(bus.consume_inbound(Some(Duration::from_millis(20))).await.is_none());

        // Second pass: the primed message is seen, fresh ones publish in
        // timestamp order.
        let older = {
            let mut m = inbound("U1", "older-but-fresh");
            m.at = Utc::now() - chrono::Duration::seconds(10);
            m
        };
        router
            .ingest_batch("slack", "C1", vec![new.clone(), old.clone(), older.clone()])
            .await;

        let first = bus.consume_inbound(Some(Duration::from_millis(50))).await.unwrap();
        let second = bus.consume_inbound(Some(Duration::from_millis(50))).await.unwrap();
        assert_eq!(first.content, "older-but-fresh");
        assert_eq!(second.content, "new");
        assert!(bus.consume_inbound(Some(Duration::from_millis(20))).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_message_handled_once() {
        let orchestrator = MockOrchestrator::replying("ok");
        let (bus, router, _t) = setup(orchestrator, Config::default());

        router.ingest_batch("slack", "C1", vec![]).await; // prime
        let msg = inbound("U1", "hello");
        router
            .ingest_batch("slack", "C1", vec![msg.clone(), msg.clone()])
            .await;
        assert!(bus.consume_inbound(Some(Duration::from_millis(50))).await.is_some());
        assert!(bus.consume_inbound(Some(Duration::from_millis(20))).await.is_none());
    }

    #[tokio::test]
    async fn thread_context_collects_same_thread_lines() {
        let orchestrator = MockOrchestrator::replying("ok");
        let (_bus, router, _t) = setup(orchestrator.clone(), Config::default());

        let mut first = inbound("U2", "thread opener");
        first.thread_id = Some("T1".into());
        router.clone().handle_message(first).await;

        let mut second = inbound("U1", "@claude summarize this thread");
        second.thread_id = Some("T1".into());
        router.clone().handle_message(second).await;

        let calls = orchestrator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(
            calls[0]
                .thread_context
                .iter()
                .any(|line| line.contains("thread opener"))
        );
    }
}
