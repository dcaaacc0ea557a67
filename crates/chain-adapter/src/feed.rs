//! Ordered delivery feeds with optional per-delivery acknowledgement.
//!
//! Used for both the ledger's live block subscription and the consumer-side queue listener.

use crate::block::Block;
use futures_util::future::BoxFuture;
use std::fmt;
use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
#[error("acknowledgement failed: {0}")]
pub struct AckError(pub String);

/// Deferred acknowledgement of one delivery. Nothing happens until [Acknowledgement::ack] is awaited.
pub struct Acknowledgement {
    fut: BoxFuture<'static, Result<(), AckError>>,
}

impl Acknowledgement {
    pub fn new<F>(fut: F) -> Self
    where
        F: Future<Output = Result<(), AckError>> + Send + 'static,
    {
        Self { fut: Box::pin(fut) }
    }

    /// Acknowledgement backed by a synchronous callback.
    pub fn from_fn(f: impl FnOnce() + Send + 'static) -> Self {
        Self::new(async move {
            f();
            Ok(())
        })
    }

    pub async fn ack(self) -> Result<(), AckError> {
        self.fut.await
    }
}

impl fmt::Debug for Acknowledgement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Acknowledgement")
    }
}

/// One delivered block. `ack` is None when the source auto-acknowledges.
#[derive(Debug)]
pub struct Delivery {
    pub block: Block,
    pub ack: Option<Acknowledgement>,
}

impl Delivery {
    pub fn auto(block: Block) -> Self {
        Self { block, ack: None }
    }

    pub fn manual(block: Block, ack: Acknowledgement) -> Self {
        Self {
            block,
            ack: Some(ack),
        }
    }
}

pub type FeedSender<E> = mpsc::UnboundedSender<Result<Delivery, E>>;

/// Receiving end of a delivery stream, optionally owning the task that produces it.
///
/// Closing (or dropping) the feed stops the producer task.
pub struct Feed<E> {
    receiver: mpsc::UnboundedReceiver<Result<Delivery, E>>,
    task: Option<JoinHandle<()>>,
}

impl<E> Feed<E> {
    pub fn channel() -> (FeedSender<E>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                receiver: rx,
                task: None,
            },
        )
    }

    /// Attach the producer task so that closing the feed also stops it.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    /// Next delivery in order. None once the producer is gone and the buffer is drained.
    pub async fn next(&mut self) -> Option<Result<Delivery, E>> {
        self.receiver.recv().await
    }

    pub fn close(&mut self) {
        self.receiver.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<E> Drop for Feed<E> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<E> fmt::Debug for Feed<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feed")
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn ack_runs_only_when_awaited() {
        let acked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&acked);
        let ack = Acknowledgement::from_fn(move || flag.store(true, Ordering::SeqCst));
        assert!(!acked.load(Ordering::SeqCst));
        ack.ack().await.unwrap();
        assert!(acked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn feed_preserves_order_and_ends_when_sender_dropped() {
        let (tx, mut feed) = Feed::<AckError>::channel();
        for h in 1..=3 {
            tx.send(Ok(Delivery::auto(Block::new(h, vec![])))).unwrap();
        }
        drop(tx);
        let mut heights = Vec::new();
        while let Some(item) = feed.next().await {
            heights.push(item.unwrap().block.height);
        }
        assert_eq!(heights, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn close_stops_producer_task() {
        let (tx, feed) = Feed::<AckError>::channel();
        let task = tokio::spawn(async move {
            loop {
                if tx.send(Ok(Delivery::auto(Block::new(1, vec![])))).is_err() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        });
        let mut feed = feed.with_task(task);
        assert!(feed.next().await.is_some());
        feed.close();
        // Drains whatever was buffered, then ends.
        while feed.next().await.is_some() {}
    }
}
