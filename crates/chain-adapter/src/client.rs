//! Consumer side: read forwarded blocks from a queue bound to the adapter's exchange.
//!
//! Downstream services use [BlockListener] to get blocks in height order. With `auto_ack`
//! disabled each block must be acknowledged before the next one arrives.

use crate::broker::{BrokerError, QueueFeed, QueueSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct BlockListener {
    source: Arc<dyn QueueSource>,
    exchange: String,
    queue: String,
    auto_ack: bool,
    listening: AtomicBool,
}

impl BlockListener {
    pub fn new(
        source: Arc<dyn QueueSource>,
        exchange: impl Into<String>,
        queue: impl Into<String>,
        auto_ack: bool,
    ) -> Self {
        Self {
            source,
            exchange: exchange.into(),
            queue: queue.into(),
            auto_ack,
            listening: AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Declare and bind the queue, then start consuming. May be called once.
    ///
    /// A broker failure shows up as an `Err` item on the returned feed.
    pub async fn listen(&self) -> Result<QueueFeed, BrokerError> {
        if self.listening.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::AlreadyListening(self.queue.clone()));
        }
        self.source.declare_topic(&self.exchange).await?;
        self.source.declare_queue(&self.queue).await?;
        self.source.bind(&self.queue, &self.exchange).await?;
        tracing::info!(queue = %self.queue, exchange = %self.exchange, auto_ack = self.auto_ack, "listening for blocks");
        self.source.consume(&self.queue, self.auto_ack).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::broker::Broker;
    use crate::memory_broker::MemoryBroker;

    #[tokio::test]
    async fn listen_twice_is_rejected() {
        let broker = Arc::new(MemoryBroker::new());
        let listener = BlockListener::new(broker.clone(), "blocks", "q", true);
        let _feed = listener.listen().await.unwrap();
        assert!(matches!(
            listener.listen().await,
            Err(BrokerError::AlreadyListening(_))
        ));
    }

    #[tokio::test]
    async fn receives_blocks_published_after_binding() {
        let broker = Arc::new(MemoryBroker::new());
        let listener = BlockListener::new(broker.clone(), "blocks", "q", true);
        let mut feed = listener.listen().await.unwrap();
        broker.publish("blocks", &Block::new(1, b"one".to_vec())).await.unwrap();
        let delivery = feed.next().await.unwrap().unwrap();
        assert_eq!(delivery.block, Block::new(1, b"one".to_vec()));
        assert!(delivery.ack.is_none());
    }
}
