//! In-process message bus.
//!
//! Two unbounded FIFO queues (inbound, outbound) with never-failing
//! publish and blocking consume. Multiple consumers compete; each item is
//! delivered to exactly one of them. Depth is tracked so health checks can
//! report queue sizes without draining.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::debug;

use murmur_types::event::{InboundMessage, OutboundMessage};

/// Queue direction selector for [`MessageBus::len`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

struct Queue<T> {
    tx: UnboundedSender<T>,
    rx: Mutex<UnboundedReceiver<T>>,
    depth: AtomicUsize,
}

impl<T> Queue<T> {
    fn new() -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            depth: AtomicUsize::new(0),
        }
    }

    fn publish(&self, item: T) {
        // The receiver lives as long as the bus, so send only fails during
        // teardown; a dropped message at that point is intentional.
        if self.tx.send(item).is_ok() {
            self.depth.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn consume(&self, timeout: Option<Duration>) -> Option<T> {
        let mut rx = self.rx.lock().await;
        let item = match timeout {
            Some(t) => tokio::time::timeout(t, rx.recv()).await.ok().flatten(),
            None => rx.recv().await,
        };
        if item.is_some() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
        }
        item
    }

    fn drain(&self) -> Vec<T> {
        let mut drained = Vec::new();
        if let Ok(mut rx) = self.rx.try_lock() {
            while let Ok(item) = rx.try_recv() {
                self.depth.fetch_sub(1, Ordering::Relaxed);
                drained.push(item);
            }
        }
        drained
    }

    fn len(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

/// The in-process bus connecting transports, router, loops, and dispatcher.
pub struct MessageBus {
    inbound: Queue<InboundMessage>,
    outbound: Queue<OutboundMessage>,
}

impl MessageBus {
    /// Create a new bus.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inbound: Queue::new(),
            outbound: Queue::new(),
        })
    }

    /// Publish an inbound message. Never fails.
    pub fn publish_inbound(&self, msg: InboundMessage) {
        debug!(provider = %msg.provider, chat_id = %msg.chat_id, "publish inbound");
        self.inbound.publish(msg);
    }

    /// Publish an outbound message. Never fails.
    pub fn publish_outbound(&self, msg: OutboundMessage) {
        debug!(provider = %msg.provider, chat_id = %msg.chat_id, "publish outbound");
        self.outbound.publish(msg);
    }

    /// Consume the next inbound message, waiting up to `timeout` when given.
    ///
    /// Returns `None` on timeout or bus teardown.
    pub async fn consume_inbound(&self, timeout: Option<Duration>) -> Option<InboundMessage> {
        self.inbound.consume(timeout).await
    }

    /// Consume the next outbound message, waiting up to `timeout` when given.
    pub async fn consume_outbound(&self, timeout: Option<Duration>) -> Option<OutboundMessage> {
        self.outbound.consume(timeout).await
    }

    /// Current queue depth for one direction.
    pub fn len(&self, direction: Direction) -> usize {
        match direction {
            Direction::Inbound => self.inbound.len(),
            Direction::Outbound => self.outbound.len(),
        }
    }

    /// Whether both queues are empty.
    pub fn is_empty(&self) -> bool {
        self.len(Direction::Inbound) == 0 && self.len(Direction::Outbound) == 0
    }

    /// Remove and return everything currently queued, for shutdown reports.
    pub fn drain(&self) -> (Vec<InboundMessage>, Vec<OutboundMessage>) {
        (self.inbound.drain(), self.outbound.drain())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_types::event::{MessageKind, MessageMetadata};

    fn inbound(content: &str) -> InboundMessage {
        InboundMessage {
            id: format!("in-{content}"),
            provider: "test".into(),
            chat_id: "chat1".into(),
            sender_id: "user1".into(),
            content: content.into(),
            at: chrono::Utc::now(),
            thread_id: None,
            media: vec![],
            metadata: MessageMetadata::default(),
        }
    }

    fn outbound(content: &str) -> OutboundMessage {
        OutboundMessage::new("test", "chat1", content, MessageKind::AgentReply)
    }

    #[tokio::test]
    async fn publish_and_consume_inbound_in_order() {
        let bus = MessageBus::new();
        for i in 0..5 {
            bus.publish_inbound(inbound(&format!("msg-{i}")));
        }
        for i in 0..5 {
            let msg = bus.consume_inbound(None).await.unwrap();
            assert_eq!(msg.content, format!("msg-{i}"));
        }
    }

    #[tokio::test]
    async fn queues_are_independent() {
        let bus = MessageBus::new();
        bus.publish_inbound(inbound("in"));
        bus.publish_outbound(outbound("out"));

        assert_eq!(bus.consume_inbound(None).await.unwrap().content, "in");
        assert_eq!(bus.consume_outbound(None).await.unwrap().content, "out");
    }

    #[tokio::test]
    async fn consume_times_out_on_empty_queue() {
        let bus = MessageBus::new();
        let got = bus
            .consume_inbound(Some(Duration::from_millis(20)))
            .await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn depth_tracks_publish_and_consume() {
        let bus = MessageBus::new();
        assert!(bus.is_empty());

        bus.publish_outbound(outbound("a"));
        bus.publish_outbound(outbound("b"));
        assert_eq!(bus.len(Direction::Outbound), 2);
        assert_eq!(bus.len(Direction::Inbound), 0);

        bus.consume_outbound(None).await.unwrap();
        assert_eq!(bus.len(Direction::Outbound), 1);
    }

    #[tokio::test]
    async fn drain_empties_both_queues() {
        let bus = MessageBus::new();
        bus.publish_inbound(inbound("a"));
        bus.publish_outbound(outbound("b"));
        bus.publish_outbound(outbound("c"));

        let (ins, outs) = bus.drain();
        assert_eq!(ins.len(), 1);
        assert_eq!(outs.len(), 2);
        assert!(bus.is_empty());
    }

    #[tokio::test]
    async fn competing_consumers_each_get_one() {
        let bus = MessageBus::new();
        for i in 0..100 {
            bus.publish_inbound(inbound(&format!("m{i}")));
        }

        let a = {
            let bus = bus.clone();
            tokio::spawn(async move {
                let mut n = 0;
                while bus
                    .consume_inbound(Some(Duration::from_millis(50)))
                    .await
                    .is_some()
                {
                    n += 1;
                }
                n
            })
        };
        let b = {
            let bus = bus.clone();
            tokio::spawn(async move {
                let mut n = 0;
                while bus
                    .consume_inbound(Some(Duration::from_millis(50)))
                    .await
                    .is_some()
                {
                    n += 1;
                }
                n
            })
        };

        let total = a.await.unwrap() + b.await.unwrap();
        assert_eq!(total, 100);
    }

    #[test]
    fn bus_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MessageBus>();
    }
}
