//! Live path: gating behind catch-up, dedup against the watermark, in-order forwarding.

mod common;

use async_trait::async_trait;
use chain_adapter::{
    AdapterBuilder, Block, BlockPublisher, Broker, Delivery, Forwarded, Gate, Height, LedgerError,
    LedgerQuery, LiveForwarder, MemoryBroker, MemoryLedger, MemoryWatermark, WatermarkStore,
};
use common::{wait_until, Fixture, EXCHANGE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn blocks_committed_while_running_have_no_gaps() {
    common::init_tracing();
    let mut fx = Fixture::new(MemoryLedger::new());
    let mut adapter = fx.adapter().await;
    adapter.start().await.expect("start");
    assert!(fx.published().is_empty());

    for _ in 0..20 {
        fx.ledger.commit_many(1);
        tokio::task::yield_now().await;
    }

    assert!(wait_until(|| fx.published().len() >= 20, Duration::from_secs(5)).await);
    assert_eq!(fx.published(), (1..=20).collect::<Vec<_>>());
    assert_eq!(fx.persisted(), 20);
    assert_eq!(adapter.last_read_block(), 20);
    adapter.close().await;
}

#[tokio::test]
async fn redelivered_blocks_are_published_once() {
    common::init_tracing();
    // The subscription repeats the last 3 blocks that catch-up also reads.
    let mut fx = Fixture::new(MemoryLedger::new().replay_on_subscribe(3));
    fx.ledger.commit_many(5);

    let mut adapter = fx.adapter().await;
    adapter.start().await.expect("start");
    fx.ledger.commit_many(1);

    assert!(wait_until(|| fx.published().len() >= 6, Duration::from_secs(5)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fx.published(), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(adapter.last_read_block(), 6);
    adapter.close().await;
}

/// Commits extra blocks in the middle of catch-up, so the live feed and the catch-up loop both
/// see them.
struct CommitDuringCatchUp {
    ledger: Arc<MemoryLedger>,
    at: Height,
    extra: usize,
    done: AtomicBool,
}

#[async_trait]
impl LedgerQuery for CommitDuringCatchUp {
    async fn get_block(&self, height: Height) -> Result<Block, LedgerError> {
        if height == self.at && !self.done.swap(true, Ordering::SeqCst) {
            self.ledger.commit_many(self.extra);
            // Give the live consumer a chance to run while still gated.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.ledger.get_block(height).await
    }
}

#[tokio::test]
async fn live_blocks_wait_for_catch_up_and_overlap_is_deduplicated() {
    common::init_tracing();
    let ledger = Arc::new(MemoryLedger::new());
    ledger.commit_many(4);
    let query = Arc::new(CommitDuringCatchUp {
        ledger: ledger.clone(),
        at: 2,
        extra: 3,
        done: AtomicBool::new(false),
    });
    let builder = AdapterBuilder::new().exchange(EXCHANGE);
    let broker = Arc::new(MemoryBroker::new().with_fatal_signal(builder.fatal_signal()));
    let watermark = Arc::new(MemoryWatermark::default());
    let mut adapter = builder
        .query(query)
        .subscription(ledger.clone())
        .broker(broker.clone())
        .watermark(watermark.clone())
        .build()
        .await
        .unwrap();

    adapter.start().await.expect("start");
    // Catch-up reached the blocks committed mid-way; the live copies are duplicates.
    assert_eq!(broker.published_heights(EXCHANGE), vec![1, 2, 3, 4, 5, 6, 7]);

    ledger.commit_many(1);
    assert!(wait_until(|| broker.published_heights(EXCHANGE).len() >= 8, Duration::from_secs(5)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.published_heights(EXCHANGE), (1..=8).collect::<Vec<_>>());
    assert_eq!(watermark.get().unwrap(), 8);
    adapter.close().await;
}

async fn forwarder_fixture() -> (Arc<MemoryBroker>, Arc<BlockPublisher>, Arc<MemoryWatermark>) {
    let broker = Arc::new(MemoryBroker::new());
    broker.declare_topic(EXCHANGE).await.unwrap();
    let watermark = Arc::new(MemoryWatermark::default());
    let publisher = Arc::new(BlockPublisher::new(broker.clone(), EXCHANGE, watermark.clone()));
    (broker, publisher, watermark)
}

#[tokio::test]
async fn consume_blocks_until_gate_opens() {
    let (broker, publisher, watermark) = forwarder_fixture().await;
    let gate = Gate::new();
    let forwarder = Arc::new(LiveForwarder::new(publisher, gate.subscribe()));

    let f = forwarder.clone();
    let task = tokio::spawn(async move { f.consume(Delivery::auto(Block::new(1, b"a".to_vec()))).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!task.is_finished());
    assert!(broker.published_heights(EXCHANGE).is_empty());

    gate.open();
    gate.open();
    assert_eq!(task.await.unwrap().unwrap(), Forwarded::Published(1));
    assert_eq!(broker.published_heights(EXCHANGE), vec![1]);
    assert_eq!(watermark.get().unwrap(), 1);
}

#[tokio::test]
async fn duplicates_are_discarded_but_acknowledged() {
    let (broker, publisher, watermark) = forwarder_fixture().await;
    watermark.set(5).unwrap();
    let gate = Gate::new();
    gate.open();
    let forwarder = LiveForwarder::new(publisher, gate.subscribe());

    let acked = Arc::new(AtomicBool::new(false));
    let flag = acked.clone();
    let delivery = Delivery::manual(
        Block::new(5, vec![]),
        chain_adapter::Acknowledgement::from_fn(move || flag.store(true, Ordering::SeqCst)),
    );
    assert_eq!(forwarder.consume(delivery).await.unwrap(), Forwarded::Duplicate(5));
    assert!(acked.load(Ordering::SeqCst));
    assert_eq!(
        forwarder.consume(Delivery::auto(Block::new(3, vec![]))).await.unwrap(),
        Forwarded::Duplicate(3)
    );
    assert!(broker.published_heights(EXCHANGE).is_empty());
    assert_eq!(watermark.get().unwrap(), 5);
}

#[tokio::test]
async fn dropped_gate_cancels_waiting_consume() {
    let (broker, publisher, _) = forwarder_fixture().await;
    let gate = Gate::new();
    let forwarder = LiveForwarder::new(publisher, gate.subscribe());
    drop(gate);
    assert_eq!(
        forwarder.consume(Delivery::auto(Block::new(1, vec![]))).await.unwrap(),
        Forwarded::Cancelled
    );
    assert!(broker.published_heights(EXCHANGE).is_empty());
}

#[tokio::test]
async fn manual_ack_follows_publish() {
    common::init_tracing();
    let mut fx = Fixture::new(MemoryLedger::new().manual_ack().replay_on_subscribe(1));
    fx.ledger.commit_many(2);
    let mut adapter = fx.adapter().await;
    adapter.start().await.expect("start");
    fx.ledger.commit_many(2);

    assert!(wait_until(|| fx.ledger.acknowledged().len() >= 3, Duration::from_secs(5)).await);
    // Block 2 was replayed (duplicate) and still acknowledged; 3 and 4 after their publish.
    assert_eq!(fx.ledger.acknowledged(), vec![2, 3, 4]);
    assert_eq!(fx.published(), vec![1, 2, 3, 4]);
    adapter.close().await;
}
