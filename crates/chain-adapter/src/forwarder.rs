//! Live path: forward blocks from the ledger subscription once catch-up is done.
//!
//! Starts Gated. Deliveries that arrive before the gate opens wait (in order) and are not
//! dropped. Once Flowing, a block at or below the watermark is a duplicate of something catch-up
//! (or an earlier live delivery) already published and is discarded.

use crate::block::Height;
use crate::error::AdapterError;
use crate::fatal::FatalSignal;
use crate::feed::Delivery;
use crate::ledger::{BlockFeed, LedgerError};
use crate::publisher::BlockPublisher;
use std::sync::Arc;
use tokio::sync::watch;

/// One-shot barrier between catch-up and the live path.
#[derive(Debug)]
pub struct Gate {
    tx: watch::Sender<bool>,
}

impl Gate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Gated -> Flowing. A second call is a no-op.
    pub fn open(&self) {
        let opened = self.tx.send_if_modified(|open| {
            if *open {
                false
            } else {
                *open = true;
                true
            }
        });
        if opened {
            tracing::info!("live forwarding gate opened");
        }
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

/// What `consume` did with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarded {
    Published(Height),
    /// At or below the watermark.
    Duplicate(Height),
    /// The gate was dropped before it opened (adapter shut down).
    Cancelled,
}

/// Single consumer of the live feed.
pub struct LiveForwarder {
    publisher: Arc<BlockPublisher>,
    gate: watch::Receiver<bool>,
}

impl LiveForwarder {
    pub fn new(publisher: Arc<BlockPublisher>, gate: watch::Receiver<bool>) -> Self {
        Self { publisher, gate }
    }

    /// Handle one delivery. Waits for the gate, then publishes unseen blocks.
    ///
    /// A manual acknowledgement is sent only after publish and persist succeed, or after the
    /// block is recognized as a duplicate.
    pub async fn consume(&self, delivery: Delivery) -> Result<Forwarded, AdapterError> {
        let mut gate = self.gate.clone();
        if gate.wait_for(|open| *open).await.is_err() {
            return Ok(Forwarded::Cancelled);
        }
        let Delivery { block, ack } = delivery;
        let watermark = self.publisher.watermark()?;
        let outcome = if block.height <= watermark {
            tracing::debug!(height = block.height, watermark, "skipping already published block");
            Forwarded::Duplicate(block.height)
        } else {
            self.publisher.publish(&block).await?;
            Forwarded::Published(block.height)
        };
        if let Some(ack) = ack {
            ack.ack().await?;
        }
        Ok(outcome)
    }

    /// Consume `feed` one delivery at a time until shutdown or the first failure.
    ///
    /// Failures (including a broken or closed subscription) are reported on `fatal`.
    pub async fn run(self, mut feed: BlockFeed, fatal: FatalSignal, mut shutdown: watch::Receiver<bool>) {
        loop {
            let next = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                next = feed.next() => next,
            };
            match next {
                Some(Ok(delivery)) => match self.consume(delivery).await {
                    Ok(Forwarded::Cancelled) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(reason = %e, "live forwarding failed");
                        fatal.report(e);
                        break;
                    }
                },
                Some(Err(e)) => {
                    tracing::error!(reason = %e, "Error on ledger subscription occurred");
                    fatal.report(e);
                    break;
                }
                None => {
                    fatal.report(LedgerError::Closed);
                    break;
                }
            }
        }
        feed.close();
        tracing::debug!("live forwarder stopped");
    }
}
