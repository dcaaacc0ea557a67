//! Broker capability: a durable fanout topic, durable queues bound to it, and persistent
//! publishing.
//!
//! Each published message carries the block payload as its body and the block height in the
//! [HEIGHT_HEADER] header, so consumers can order and deduplicate without decoding the payload.

use crate::block::{Block, Height};
use crate::feed::Feed;
use async_trait::async_trait;
use thiserror::Error;

/// Message header holding the block height.
pub const HEIGHT_HEADER: &str = "height";

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection lost: {0}")]
    ConnectionLost(String),

    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    #[error("publish of block {0} was not confirmed by the broker")]
    NotConfirmed(Height),

    #[error("message without a valid height header")]
    MissingHeight,

    #[error("listener already started on queue {0}")]
    AlreadyListening(String),

    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
}

/// Feed of blocks consumed from a broker queue.
pub type QueueFeed = Feed<BrokerError>;

/// Publishing side of the broker. All declarations are idempotent.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a durable fanout topic.
    async fn declare_topic(&self, topic: &str) -> Result<(), BrokerError>;

    /// Declare a durable queue.
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError>;

    /// Bind `queue` to `topic` with no routing key.
    async fn bind(&self, queue: &str, topic: &str) -> Result<(), BrokerError>;

    /// Publish `block` to `topic` with persistent delivery. Returns once the broker has it.
    async fn publish(&self, topic: &str, block: &Block) -> Result<(), BrokerError>;

    /// Release channels and connections. Best effort.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Consuming side of the broker.
#[async_trait]
pub trait QueueSource: Broker {
    /// Consume `queue` in order. With `auto_ack == false` the next message is not delivered
    /// until the previous one is acknowledged.
    async fn consume(&self, queue: &str, auto_ack: bool) -> Result<QueueFeed, BrokerError>;
}

/// Declare `topic` and every queue in `queues`, each bound to the topic.
pub async fn declare_fanout(
    broker: &dyn Broker,
    topic: &str,
    queues: &[String],
) -> Result<(), BrokerError> {
    broker.declare_topic(topic).await?;
    for queue in queues {
        broker.declare_queue(queue).await?;
        broker.bind(queue, topic).await?;
        tracing::info!(queue = %queue, topic = %topic, "queue bound");
    }
    Ok(())
}
