//! Startup catch-up: replay every block between the watermark and the ledger head.

use crate::block::Height;
use crate::error::AdapterError;
use crate::ledger::{LedgerError, LedgerQuery};
use crate::publisher::BlockPublisher;
use crate::watermark::WatermarkError;
use std::sync::Arc;

/// Sequential pull of unread blocks.
///
/// Starts at `watermark + 1` and walks one height at a time. The only clean exit is the
/// ledger's [LedgerError::BeyondHead]; anything else is returned as fatal.
pub struct CatchUp {
    ledger: Arc<dyn LedgerQuery>,
    publisher: Arc<BlockPublisher>,
}

impl CatchUp {
    pub fn new(ledger: Arc<dyn LedgerQuery>, publisher: Arc<BlockPublisher>) -> Self {
        Self { ledger, publisher }
    }

    /// Publish all unread blocks. Returns the watermark after the last one.
    pub async fn run(&self) -> Result<Height, AdapterError> {
        let mut last_processed = self.publisher.watermark()?;
        loop {
            let next = last_processed
                .checked_add(1)
                .ok_or(WatermarkError::Overflow(last_processed))?;
            tracing::info!(height = next, "Try read ledger block {}", next);
            match self.ledger.get_block(next).await {
                Ok(block) => {
                    if block.height != next {
                        return Err(LedgerError::UnexpectedHeight {
                            expected: next,
                            actual: block.height,
                        }
                        .into());
                    }
                    self.publisher.publish(&block).await?;
                    last_processed = next;
                }
                Err(LedgerError::BeyondHead(_)) => {
                    tracing::info!(height = last_processed, "Done publishing unread blocks");
                    return Ok(last_processed);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
