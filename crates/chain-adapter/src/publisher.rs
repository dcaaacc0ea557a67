//! Publish-then-persist step shared by catch-up and the live path.

use crate::block::{Block, Height};
use crate::broker::Broker;
use crate::error::AdapterError;
use crate::watermark::{WatermarkError, WatermarkStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Publishes blocks to the topic and advances the watermark after each one.
pub struct BlockPublisher {
    broker: Arc<dyn Broker>,
    topic: String,
    watermark: Arc<dyn WatermarkStore>,
    last_read: AtomicU64,
}

impl BlockPublisher {
    pub fn new(broker: Arc<dyn Broker>, topic: impl Into<String>, watermark: Arc<dyn WatermarkStore>) -> Self {
        Self {
            broker,
            topic: topic.into(),
            watermark,
            last_read: AtomicU64::new(0),
        }
    }

    /// Publish `block`, then persist its height. The live view is updated only after the
    /// persist succeeds.
    pub async fn publish(&self, block: &Block) -> Result<(), AdapterError> {
        self.broker.publish(&self.topic, block).await?;
        tracing::info!(height = block.height, "Block {} pushed", block.height);
        self.watermark.set(block.height)?;
        self.last_read.store(block.height, Ordering::SeqCst);
        Ok(())
    }

    /// Persisted watermark.
    pub fn watermark(&self) -> Result<Height, WatermarkError> {
        self.watermark.get()
    }

    /// Reset the persisted watermark (and the live view) to 0.
    pub fn reset(&self) -> Result<(), WatermarkError> {
        self.watermark.reset()?;
        self.last_read.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Refresh the live view from the store.
    pub fn load(&self) -> Result<Height, WatermarkError> {
        let height = self.watermark.get()?;
        self.last_read.store(height, Ordering::SeqCst);
        Ok(height)
    }

    /// Live view of the watermark.
    pub fn last_read_block(&self) -> Height {
        self.last_read.load(Ordering::SeqCst)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}
