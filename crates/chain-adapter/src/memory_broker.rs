//! In-process fanout broker.
//!
//! Topics fan every published block out to all bound queues. Queues hold messages until they
//! are consumed (auto-ack) or acknowledged (manual ack, one unacknowledged message at a time).
//! [MemoryBroker::sever] simulates a lost connection: later calls fail and the fatal signal
//! fires, as a real client's connection-error callback would.

use crate::block::Block;
use crate::broker::{Broker, BrokerError, QueueFeed, QueueSource};
use crate::fatal::FatalSignal;
use crate::feed::{Acknowledgement, Delivery, Feed, FeedSender};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, Notify};

#[derive(Default)]
struct Queue {
    messages: VecDeque<Block>,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct Exchange {
    /// topic -> bound queues
    topics: HashMap<String, Vec<String>>,
    queues: HashMap<String, Queue>,
    published: Vec<(String, Block)>,
    severed: Option<String>,
    closed: bool,
}

impl Exchange {
    fn check_connected(&self) -> Result<(), BrokerError> {
        match &self.severed {
            Some(reason) => Err(BrokerError::ConnectionLost(reason.clone())),
            None => Ok(()),
        }
    }
}

fn lock(state: &Mutex<Exchange>) -> MutexGuard<'_, Exchange> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<Exchange>>,
    fatal: Option<FatalSignal>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report connection loss on `fatal`.
    pub fn with_fatal_signal(mut self, fatal: FatalSignal) -> Self {
        self.fatal = Some(fatal);
        self
    }

    /// Drop the "connection": every later call fails and the fatal signal fires.
    pub fn sever(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut state = lock(&self.state);
        if state.severed.is_some() {
            return;
        }
        state.severed = Some(reason.clone());
        for queue in state.queues.values() {
            queue.notify.notify_one();
        }
        drop(state);
        tracing::error!(reason = %reason, "broker connection error");
        if let Some(fatal) = &self.fatal {
            fatal.report(BrokerError::ConnectionLost(reason));
        }
    }

    pub fn is_severed(&self) -> bool {
        lock(&self.state).severed.is_some()
    }

    /// True once [Broker::close] was called.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Every block published to `topic`, in publish order.
    pub fn published(&self, topic: &str) -> Vec<Block> {
        lock(&self.state)
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, b)| b.clone())
            .collect()
    }

    /// Heights published to `topic`, in publish order.
    pub fn published_heights(&self, topic: &str) -> Vec<u64> {
        self.published(topic).iter().map(|b| b.height).collect()
    }

    /// Messages waiting in `queue`, or None if it was never declared.
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        lock(&self.state).queues.get(queue).map(|q| q.messages.len())
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        lock(&self.state).topics.contains_key(topic)
    }

    /// Queues bound to `topic`.
    pub fn bindings(&self, topic: &str) -> Vec<String> {
        lock(&self.state).topics.get(topic).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_topic(&self, topic: &str) -> Result<(), BrokerError> {
        let mut state = lock(&self.state);
        state.check_connected()?;
        state.topics.entry(topic.to_string()).or_default();
        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let mut state = lock(&self.state);
        state.check_connected()?;
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn bind(&self, queue: &str, topic: &str) -> Result<(), BrokerError> {
        let mut state = lock(&self.state);
        state.check_connected()?;
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }
        let bound = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;
        if !bound.iter().any(|q| q == queue) {
            bound.push(queue.to_string());
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, block: &Block) -> Result<(), BrokerError> {
        let mut state = lock(&self.state);
        state.check_connected()?;
        let bound = state
            .topics
            .get(topic)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;
        for name in &bound {
            if let Some(queue) = state.queues.get_mut(name) {
                queue.messages.push_back(block.clone());
                queue.notify.notify_one();
            }
        }
        state.published.push((topic.to_string(), block.clone()));
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        lock(&self.state).closed = true;
        Ok(())
    }
}

#[async_trait]
impl QueueSource for MemoryBroker {
    async fn consume(&self, queue: &str, auto_ack: bool) -> Result<QueueFeed, BrokerError> {
        let notify = {
            let state = lock(&self.state);
            state.check_connected()?;
            state
                .queues
                .get(queue)
                .map(|q| Arc::clone(&q.notify))
                .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?
        };
        let (tx, feed) = Feed::channel();
        let task = tokio::spawn(deliver(
            Arc::clone(&self.state),
            queue.to_string(),
            notify,
            auto_ack,
            tx,
        ));
        Ok(feed.with_task(task))
    }
}

async fn deliver(
    state: Arc<Mutex<Exchange>>,
    queue: String,
    notify: Arc<Notify>,
    auto_ack: bool,
    tx: FeedSender<BrokerError>,
) {
    loop {
        let next = {
            let mut guard = lock(&state);
            if let Err(e) = guard.check_connected() {
                let _ = tx.send(Err(e));
                return;
            }
            let Some(q) = guard.queues.get_mut(&queue) else {
                let _ = tx.send(Err(BrokerError::UnknownQueue(queue.clone())));
                return;
            };
            if auto_ack {
                q.messages.pop_front()
            } else {
                q.messages.front().cloned()
            }
        };
        let Some(block) = next else {
            notify.notified().await;
            continue;
        };
        if auto_ack {
            if tx.send(Ok(Delivery::auto(block))).is_err() {
                return;
            }
            continue;
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        let delivery = Delivery::manual(
            block,
            Acknowledgement::from_fn(move || {
                let _ = ack_tx.send(());
            }),
        );
        if tx.send(Ok(delivery)).is_err() {
            return;
        }
        if ack_rx.await.is_err() {
            // Dropped without ack: the message stays unacknowledged and blocks the queue.
            std::future::pending::<()>().await;
        }
        if let Some(q) = lock(&state).queues.get_mut(&queue) {
            q.messages.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fatal::fatal_channel;

    #[tokio::test]
    async fn fanout_reaches_every_bound_queue() {
        let broker = MemoryBroker::new();
        broker.declare_topic("blocks").await.unwrap();
        for q in ["a", "b"] {
            broker.declare_queue(q).await.unwrap();
            broker.bind(q, "blocks").await.unwrap();
        }
        // Redeclaring is harmless.
        broker.declare_topic("blocks").await.unwrap();
        broker.bind("a", "blocks").await.unwrap();

        broker.publish("blocks", &Block::new(1, b"x".to_vec())).await.unwrap();
        assert_eq!(broker.queue_depth("a"), Some(1));
        assert_eq!(broker.queue_depth("b"), Some(1));
        assert_eq!(broker.published_heights("blocks"), vec![1]);
        assert_eq!(broker.bindings("blocks"), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn publish_to_unknown_topic_fails() {
        let broker = MemoryBroker::new();
        let err = broker.publish("nope", &Block::new(1, vec![])).await.unwrap_err();
        assert!(matches!(err, BrokerError::UnknownTopic(_)));
    }

    #[tokio::test]
    async fn sever_fails_calls_and_reports_fatal() {
        let (signal, mut rx) = fatal_channel();
        let broker = MemoryBroker::new().with_fatal_signal(signal);
        broker.declare_topic("blocks").await.unwrap();
        broker.sever("connection reset");
        assert!(broker.is_severed());
        let err = broker.publish("blocks", &Block::new(1, vec![])).await.unwrap_err();
        assert!(matches!(err, BrokerError::ConnectionLost(_)));
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn manual_ack_holds_back_next_message() {
        let broker = MemoryBroker::new();
        broker.declare_topic("blocks").await.unwrap();
        broker.declare_queue("q").await.unwrap();
        broker.bind("q", "blocks").await.unwrap();
        for h in 1..=2 {
            broker.publish("blocks", &Block::new(h, vec![])).await.unwrap();
        }
        let mut feed = broker.consume("q", false).await.unwrap();
        let first = feed.next().await.unwrap().unwrap();
        assert_eq!(first.block.height, 1);
        let pending = tokio::time::timeout(std::time::Duration::from_millis(50), feed.next()).await;
        assert!(pending.is_err(), "second message delivered before ack");
        first.ack.unwrap().ack().await.unwrap();
        let second = feed.next().await.unwrap().unwrap();
        assert_eq!(second.block.height, 2);
    }
}
