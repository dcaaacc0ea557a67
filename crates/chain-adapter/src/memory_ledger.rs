//! In-process ledger: an append-only chain with query and live subscription.
//!
//! Stands in for a real ledger in tests and local dry runs. Optional behaviours mimic what a
//! real subscription does at the catch-up boundary: replaying recent blocks on subscribe, and
//! manual acknowledgement.

use crate::block::{Block, Height};
use crate::feed::{Acknowledgement, Delivery, Feed, FeedSender};
use crate::ledger::{BlockFeed, LedgerError, LedgerQuery, LedgerSubscription};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Chain {
    blocks: Vec<Block>,
    subscribers: Vec<FeedSender<LedgerError>>,
    query_failure: Option<String>,
    queries: Vec<Height>,
}

/// Append-only in-memory chain. Heights start at 1.
#[derive(Default)]
pub struct MemoryLedger {
    chain: Mutex<Chain>,
    replay_on_subscribe: usize,
    manual_ack: bool,
    acknowledged: Arc<Mutex<Vec<Height>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay the last `n` committed blocks to every new subscriber before live blocks.
    pub fn replay_on_subscribe(mut self, n: usize) -> Self {
        self.replay_on_subscribe = n;
        self
    }

    /// Deliver blocks with a manual acknowledgement; see [MemoryLedger::acknowledged].
    pub fn manual_ack(mut self) -> Self {
        self.manual_ack = true;
        self
    }

    fn chain(&self) -> MutexGuard<'_, Chain> {
        // A poisoned chain only happens after a panicking test; keep serving.
        self.chain.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Commit a new block and push it to live subscribers. Returns its height.
    pub fn commit(&self, payload: impl Into<Vec<u8>>) -> Height {
        let mut chain = self.chain();
        let height = chain.blocks.len() as Height + 1;
        let block = Block::new(height, payload);
        chain.subscribers.retain(|tx| {
            tx.send(Ok(make_delivery(block.clone(), self.manual_ack, &self.acknowledged)))
                .is_ok()
        });
        chain.blocks.push(block);
        height
    }

    /// Commit `n` blocks with generated payloads. Returns the new head.
    pub fn commit_many(&self, n: usize) -> Height {
        let mut head = self.head();
        for _ in 0..n {
            let next = head + 1;
            head = self.commit(format!("block-{}", next).into_bytes());
        }
        head
    }

    pub fn head(&self) -> Height {
        self.chain().blocks.len() as Height
    }

    /// Heights acknowledged by subscribers, in acknowledgement order.
    pub fn acknowledged(&self) -> Vec<Height> {
        self.acknowledged
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    /// Heights requested through [LedgerQuery::get_block], in request order.
    pub fn queries(&self) -> Vec<Height> {
        self.chain().queries.clone()
    }

    /// Make every subsequent query fail with a non-head error.
    pub fn fail_queries(&self, reason: impl Into<String>) {
        self.chain().query_failure = Some(reason.into());
    }

    /// Break every open subscription with `reason`.
    pub fn fail_subscriptions(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut chain = self.chain();
        for tx in chain.subscribers.drain(..) {
            let _ = tx.send(Err(LedgerError::Unavailable(reason.clone())));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.chain().subscribers.iter().filter(|tx| !tx.is_closed()).count()
    }
}

fn make_delivery(block: Block, manual_ack: bool, acknowledged: &Arc<Mutex<Vec<Height>>>) -> Delivery {
    if !manual_ack {
        return Delivery::auto(block);
    }
    let height = block.height;
    let acknowledged = Arc::clone(acknowledged);
    Delivery::manual(
        block,
        Acknowledgement::from_fn(move || {
            if let Ok(mut acked) = acknowledged.lock() {
                acked.push(height);
            }
        }),
    )
}

#[async_trait]
impl LedgerQuery for MemoryLedger {
    async fn get_block(&self, height: Height) -> Result<Block, LedgerError> {
        let mut chain = self.chain();
        chain.queries.push(height);
        if let Some(reason) = &chain.query_failure {
            return Err(LedgerError::Unavailable(reason.clone()));
        }
        match height {
            0 => Err(LedgerError::Unavailable("height 0 is not a block".into())),
            h => chain
                .blocks
                .get((h - 1) as usize)
                .cloned()
                .ok_or(LedgerError::BeyondHead(h)),
        }
    }
}

#[async_trait]
impl LedgerSubscription for MemoryLedger {
    async fn subscribe(&self) -> Result<BlockFeed, LedgerError> {
        let (tx, feed) = Feed::channel();
        let mut chain = self.chain();
        let start = chain.blocks.len().saturating_sub(self.replay_on_subscribe);
        for block in &chain.blocks[start..] {
            let _ = tx.send(Ok(make_delivery(block.clone(), self.manual_ack, &self.acknowledged)));
        }
        chain.subscribers.push(tx);
        Ok(feed)
    }
}
