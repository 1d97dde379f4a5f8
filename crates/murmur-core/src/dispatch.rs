//! Outbound dispatcher.
//!
//! Consumes the outbound queue and delivers each message through the
//! channel registry. Delivery policy per message:
//!
//! 1. **Dedupe** -- a fingerprint over `(provider, chat_id, kind,
//!    trigger_message_id | sender+content hash)` is checked before the
//!    first attempt; a hit within the window reports success w/o sending.
//! 2. **Inline retries** -- up to `inline_max` extra attempts with
//!    exponential backoff (`base * 2^(n-1)`, capped) plus uniform jitter.
//! 3. **Requeue** -- on a retryable error with requeue allowed, the message
//!    is cloned, `dispatch_retry` advanced, and re-published after the same
//!    backoff. Each requeued pass gets a single attempt, bounding total
//!    attempts at `inline_max + 1 + retry_max`.
//! 4. **DLQ** -- non-retryable errors and exhausted requeues append a
//!    dead-letter record and drop the message.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use murmur_channels::ChannelRegistry;
use murmur_types::config::DispatchConfig;
use murmur_types::error::ChannelError;
use murmur_types::event::{MessageKind, OutboundMessage};

use crate::bus::MessageBus;
use crate::dedupe::SeenSet;
use crate::dlq::{DeadLetterQueue, DlqRecord};

/// Outcome of a single dispatch pass, for tests and metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The transport accepted the message.
    Sent,
    /// A duplicate within the dedupe window; nothing was sent.
    Deduped,
    /// The message was re-published for a later pass.
    Requeued,
    /// The message was dead-lettered.
    DeadLettered,
}

/// Consumes `bus` outbound and delivers through `registry`.
pub struct OutboundDispatcher {
    bus: Arc<MessageBus>,
    registry: Arc<ChannelRegistry>,
    config: DispatchConfig,
    dlq: DeadLetterQueue,
    stream_seen: SeenSet,
    reply_seen: SeenSet,
}

impl OutboundDispatcher {
    /// Create a dispatcher with the given policy.
    pub fn new(bus: Arc<MessageBus>, registry: Arc<ChannelRegistry>, config: DispatchConfig) -> Self {
        let dlq = DeadLetterQueue::new(config.dlq_path.clone());
        let stream_seen = SeenSet::new(config.stream_dedupe_window_ms as i64, 4_096);
        let reply_seen = SeenSet::new(config.reply_dedupe_window_ms as i64, 4_096);
        Self {
            bus,
            registry,
            config,
            dlq,
            stream_seen,
            reply_seen,
        }
    }

    /// The dead-letter queue, for health reporting.
    pub fn dlq(&self) -> &DeadLetterQueue {
        &self.dlq
    }

    /// Run until cancelled, draining the outbound queue.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("outbound dispatcher started");
        loop {
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("outbound dispatcher cancelled");
                    return;
                }
                msg = self.bus.consume_outbound(None) => msg,
            };
            match msg {
                Some(msg) => {
                    self.dispatch(msg).await;
                }
                None => {
                    info!("outbound queue closed, dispatcher exiting");
                    return;
                }
            }
        }
    }

    /// Deliver one message according to the retry policy.
    pub async fn dispatch(&self, msg: OutboundMessage) -> DispatchOutcome {
        // Requeued messages already passed dedupe on their first pass.
        if msg.metadata.dispatch_retry == 0 && !self.check_dedupe(&msg) {
            debug!(provider = %msg.provider, chat_id = %msg.chat_id, "outbound deduped");
            return DispatchOutcome::Deduped;
        }

        let is_first_pass = msg.metadata.dispatch_retry == 0;
        let attempts_allowed = if is_first_pass {
            1 + self.config.inline_max
        } else {
            1
        };

        let mut last_error: Option<ChannelError> = None;
        for attempt in 1..=attempts_allowed {
            match self.registry.send(&msg).await {
                Ok(id) => {
                    debug!(
                        provider = %msg.provider,
                        chat_id = %msg.chat_id,
                        message_id = %id.0,
                        attempt,
                        "outbound sent"
                    );
                    return DispatchOutcome::Sent;
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    warn!(
                        provider = %msg.provider,
                        chat_id = %msg.chat_id,
                        attempt,
                        error = %e,
                        retryable,
                        "outbound send failed"
                    );
                    if !retryable {
                        let attempts = if is_first_pass {
                            attempt
                        } else {
                            self.config.inline_max + 1 + msg.metadata.dispatch_retry
                        };
                        self.dead_letter(&msg, attempts, &e.reason()).await;
                        return DispatchOutcome::DeadLettered;
                    }
                    last_error = Some(e);
                    if attempt < attempts_allowed {
                        tokio::time::sleep(self.backoff(attempt)).await;
                    }
                }
            }
        }

        let reason = last_error
            .map(|e| e.reason())
            .unwrap_or_else(|| "unknown".into());

        if self.config.allow_requeue && msg.metadata.dispatch_retry < self.config.retry_max {
            self.requeue(&msg);
            DispatchOutcome::Requeued
        } else {
            // Total sends across all passes: the first pass spent
            // 1 + inline_max, every requeued pass one more.
            let attempts = if is_first_pass {
                attempts_allowed
            } else {
                self.config.inline_max + 1 + msg.metadata.dispatch_retry
            };
            self.dead_letter(&msg, attempts, &reason).await;
            DispatchOutcome::DeadLettered
        }
    }

    /// Fingerprint check. `true` means fresh (go ahead and send).
    fn check_dedupe(&self, msg: &OutboundMessage) -> bool {
        let key = fingerprint(msg);
        if msg.metadata.kind == Some(MessageKind::AgentStream) {
            self.stream_seen.check_and_mark(&key)
        } else {
            self.reply_seen.check_and_mark(&key)
        }
    }

    fn requeue(&self, msg: &OutboundMessage) {
        let mut clone = msg.clone();
        clone.metadata.dispatch_retry += 1;
        let delay = self.backoff(clone.metadata.dispatch_retry);
        debug!(
            provider = %clone.provider,
            chat_id = %clone.chat_id,
            dispatch_retry = clone.metadata.dispatch_retry,
            delay_ms = delay.as_millis() as u64,
            "requeueing outbound"
        );
        let bus = self.bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            bus.publish_outbound(clone);
        });
    }

    async fn dead_letter(&self, msg: &OutboundMessage, attempts: u32, reason: &str) {
        self.dlq
            .append(&DlqRecord::from_message(msg, attempts, reason))
            .await;
    }

    /// `base * 2^(n-1)` capped at `max`, plus uniform jitter.
    fn backoff(&self, n: u32) -> Duration {
        let exp = n.saturating_sub(1).min(16);
        let base = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.config.backoff_max_ms);
        let jitter = if self.config.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.config.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }
}

/// Dedupe fingerprint: `provider:chat_id:kind:(trigger | sender+content hash)`.
pub fn fingerprint(msg: &OutboundMessage) -> String {
    let kind = msg
        .metadata
        .kind
        .map(|k| serde_json::to_string(&k).unwrap_or_default())
        .unwrap_or_default();
    let tail = match &msg.metadata.trigger_message_id {
        Some(trigger) => trigger.clone(),
        None => {
            let mut hasher = Sha256::new();
            hasher.update(msg.sender_id.as_bytes());
            hasher.update(msg.content.as_bytes());
            format!("{:x}", hasher.finalize())
        }
    };
    format!("{}:{}:{}:{}", msg.provider, msg.chat_id, kind, tail).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use murmur_channels::traits::{ChannelTransport, Mention, MessageId, ReadTarget};
    use murmur_types::event::InboundMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transport that fails the first `fail_count` sends with `reason`.
    struct FlakyTransport {
        sends: AtomicUsize,
        fail_count: usize,
        reason: String,
    }

    impl FlakyTransport {
        fn new(fail_count: usize, reason: &str) -> Self {
            Self {
                sends: AtomicUsize::new(0),
                fail_count,
                reason: reason.into(),
            }
        }
    }

    #[async_trait]
    impl ChannelTransport for FlakyTransport {
        fn name(&self) -> &str {
            "slack"
        }

        fn read_targets(&self) -> Vec<ReadTarget> {
            vec![]
        }

        async fn start(&self) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn send(&self, _msg: &OutboundMessage) -> Result<MessageId, ChannelError> {
            let n = self.sends.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_count {
                Err(ChannelError::SendFailed {
                    reason: self.reason.clone(),
                })
            } else {
                Ok(MessageId(format!("m-{n}")))
            }
        }

        async fn read(&self, _chat_id: &str, _limit: usize) -> Vec<InboundMessage> {
            vec![]
        }

        async fn edit_message(&self, _c: &str, _m: &str, _t: &str) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn add_reaction(&self, _c: &str, _m: &str, _r: &str) -> Result<(), ChannelError> {
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

        fn parse_agent_mentions(&self, _content: &str) -> Vec<Mention> {
            vec![]
        }
    }

    fn test_config() -> DispatchConfig {
        DispatchConfig {
            inline_max: 0,
            backoff_base_ms: 1,
            backoff_max_ms: 4,
            jitter_ms: 0,
            retry_max: 3,
            allow_requeue: true,
            dlq_path: std::env::temp_dir()
                .join(format!("murmur-dispatch-{}.jsonl", uuid::Uuid::new_v4())),
            stream_dedupe_window_ms: 5_000,
            reply_dedupe_window_ms: 60_000,
        }
    }

    fn setup(
        transport: Arc<FlakyTransport>,
        config: DispatchConfig,
    ) -> (Arc<MessageBus>, Arc<OutboundDispatcher>) {
        let bus = MessageBus::new();
        let mut registry = ChannelRegistry::new();
        registry.register(transport);
        let dispatcher = Arc::new(OutboundDispatcher::new(
            bus.clone(),
            Arc::new(registry),
            config,
        ));
        (bus, dispatcher)
    }

    fn msg_with_trigger(trigger: &str) -> OutboundMessage {
        let mut msg = OutboundMessage::new("slack", "C1", "hello", MessageKind::AgentReply);
        msg.metadata.trigger_message_id = Some(trigger.into());
        msg.sender_id = "bot".into();
        msg
    }

    #[tokio::test]
    async fn successful_send() {
        let transport = Arc::new(FlakyTransport::new(0, ""));
        let (_bus, dispatcher) = setup(transport.clone(), test_config());

        let outcome = dispatcher.dispatch(msg_with_trigger("t1")).await;
        assert_eq!(outcome, DispatchOutcome::Sent);
        assert_eq!(transport.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_within_window_sends_once() {
        let transport = Arc::new(FlakyTransport::new(0, ""));
        let (_bus, dispatcher) = setup(transport.clone(), test_config());

        assert_eq!(
            dispatcher.dispatch(msg_with_trigger("t1")).await,
            DispatchOutcome::Sent
        );
        assert_eq!(
            dispatcher.dispatch(msg_with_trigger("t1")).await,
            DispatchOutcome::Deduped
        );
        assert_eq!(transport.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retryable_error_requeues_with_advanced_counter() {
        let transport = Arc::new(FlakyTransport::new(10, "rate_limited"));
        let (bus, dispatcher) = setup(transport, test_config());

        let outcome = dispatcher.dispatch(msg_with_trigger("t2")).await;
        assert_eq!(outcome, DispatchOutcome::Requeued);

        let requeued = bus
            .consume_outbound(Some(Duration::from_millis(500)))
            .await
            .expect("requeued message should be re-published");
        assert_eq!(requeued.metadata.dispatch_retry, 1);
    }

    #[tokio::test]
    async fn non_retryable_goes_straight_to_dlq() {
        let transport = Arc::new(FlakyTransport::new(10, "channel_not_found"));
        let config = test_config();
        let dlq_path = config.dlq_path.clone();
        let (_bus, dispatcher) = setup(transport.clone(), config);

        let outcome = dispatcher.dispatch(msg_with_trigger("t3")).await;
        assert_eq!(outcome, DispatchOutcome::DeadLettered);
        assert_eq!(transport.sends.load(Ordering::SeqCst), 1);

        let records = dispatcher.dlq().load().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error, "channel_not_found");

        let _ = tokio::fs::remove_file(&dlq_path).await;
    }

    #[tokio::test]
    async fn total_attempts_bounded() {
        // inline_max=1, retry_max=2: first pass 2 attempts, then one per
        // requeue pass -> at most 1 + inline_max + retry_max = 4 sends.
        let transport = Arc::new(FlakyTransport::new(usize::MAX, "timeout"));
        let mut config = test_config();
        config.inline_max = 1;
        config.retry_max = 2;
        let dlq_path = config.dlq_path.clone();
        let (bus, dispatcher) = setup(transport.clone(), config);

        let mut outcome = dispatcher.dispatch(msg_with_trigger("t4")).await;
        while outcome == DispatchOutcome::Requeued {
            let msg = bus
                .consume_outbound(Some(Duration::from_millis(500)))
                .await
                .unwrap();
            outcome = dispatcher.dispatch(msg).await;
        }

        assert_eq!(outcome, DispatchOutcome::DeadLettered);
        assert_eq!(transport.sends.load(Ordering::SeqCst), 4);

        let records = dispatcher.dlq().load().await;
        assert_eq!(records[0].retry_count, 4);

        let _ = tokio::fs::remove_file(&dlq_path).await;
    }

    #[tokio::test]
    async fn requeue_disabled_dead_letters_immediately() {
        let transport = Arc::new(FlakyTransport::new(usize::MAX, "timeout"));
        let mut config = test_config();
        config.allow_requeue = false;
        let dlq_path = config.dlq_path.clone();
        let (_bus, dispatcher) = setup(transport, config);

        let outcome = dispatcher.dispatch(msg_with_trigger("t5")).await;
        assert_eq!(outcome, DispatchOutcome::DeadLettered);

        let _ = tokio::fs::remove_file(&dlq_path).await;
    }

    #[test]
    fn fingerprint_prefers_trigger_id() {
        let a = msg_with_trigger("trig-1");
        let mut b = msg_with_trigger("trig-1");
        b.content = "different".into();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_hashes_content_without_trigger() {
        let mut a = OutboundMessage::new("slack", "C1", "same", MessageKind::AgentReply);
        a.sender_id = "bot".into();
        let mut b = a.clone();
        b.id = "out-other".into();
        assert_eq!(fingerprint(&a), fingerprint(&b));

        b.content = "changed".into();
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_differs_across_kinds() {
        let mut a = msg_with_trigger("t");
        let mut b = msg_with_trigger("t");
        a.metadata.kind = Some(MessageKind::AgentReply);
        b.metadata.kind = Some(MessageKind::AgentStream);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[tokio::test]
    async fn run_drains_until_cancelled() {
        let transport = Arc::new(FlakyTransport::new(0, ""));
        let (bus, dispatcher) = setup(transport.clone(), test_config());

        let cancel = CancellationToken::new();
        let worker = tokio::spawn(dispatcher.clone().run(cancel.clone()));

        bus.publish_outbound(msg_with_trigger("r1"));
        bus.publish_outbound(msg_with_trigger("r2"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        worker.await.unwrap();

        assert_eq!(transport.sends.load(Ordering::SeqCst), 2);
    }
}
