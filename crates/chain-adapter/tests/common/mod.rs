//! Common helpers for integration tests.

#![allow(dead_code)]

use chain_adapter::{
    Adapter, AdapterBuilder, Block, Broker, BrokerError, FileWatermark, Height, MemoryBroker,
    MemoryLedger, WatermarkError, WatermarkStore,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{sleep, Instant};
use tracing_subscriber::EnvFilter;

pub const EXCHANGE: &str = "ledger-blocks";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("chain_adapter=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

/// In-memory ledger and broker plus a watermark file in a temp dir.
pub struct Fixture {
    pub ledger: Arc<MemoryLedger>,
    pub broker: Arc<MemoryBroker>,
    pub watermark: Arc<FileWatermark>,
    pub dir: TempDir,
}

impl Fixture {
    pub fn new(ledger: MemoryLedger) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let watermark = FileWatermark::open(dir.path().join("last_read_block.txt")).expect("watermark");
        Self {
            ledger: Arc::new(ledger),
            broker: Arc::new(MemoryBroker::new()),
            watermark: Arc::new(watermark),
            dir,
        }
    }

    /// Builder with the fixture's collaborators. The broker reports connection loss on the
    /// builder's fatal signal.
    pub fn builder(&mut self) -> AdapterBuilder {
        let builder = AdapterBuilder::new().exchange(EXCHANGE);
        let broker = Arc::new(MemoryBroker::new().with_fatal_signal(builder.fatal_signal()));
        self.broker = broker.clone();
        builder
            .ledger(self.ledger.clone())
            .broker(broker)
            .watermark(self.watermark.clone())
    }

    pub async fn adapter(&mut self) -> Adapter {
        self.builder().build().await.expect("build adapter")
    }

    pub fn published(&self) -> Vec<Height> {
        self.broker.published_heights(EXCHANGE)
    }

    pub fn persisted(&self) -> Height {
        self.watermark.get().expect("read watermark")
    }
}

/// Poll `cond` every 10ms until it holds or `within` elapses.
pub async fn wait_until<F: FnMut() -> bool>(mut cond: F, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Watermark whose writes start failing on demand.
#[derive(Default)]
pub struct FlakyWatermark {
    height: std::sync::Mutex<Height>,
    fail: AtomicBool,
}

impl FlakyWatermark {
    pub fn fail_writes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

impl WatermarkStore for FlakyWatermark {
    fn get(&self) -> Result<Height, WatermarkError> {
        Ok(*self.height.lock().unwrap())
    }

    fn set(&self, height: Height) -> Result<(), WatermarkError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(WatermarkError::Io {
                path: "flaky".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        *self.height.lock().unwrap() = height;
        Ok(())
    }
}

/// Broker wrapper that fails every publish after the first `ok` ones.
pub struct FailingBroker {
    pub inner: MemoryBroker,
    ok: usize,
    seen: std::sync::atomic::AtomicUsize,
}

impl FailingBroker {
    pub fn after(ok: usize) -> Self {
        Self {
            inner: MemoryBroker::new(),
            ok,
            seen: Default::default(),
        }
    }
}

#[async_trait::async_trait]
impl Broker for FailingBroker {
    async fn declare_topic(&self, topic: &str) -> Result<(), BrokerError> {
        self.inner.declare_topic(topic).await
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.inner.declare_queue(queue).await
    }

    async fn bind(&self, queue: &str, topic: &str) -> Result<(), BrokerError> {
        self.inner.bind(queue, topic).await
    }

    async fn publish(&self, topic: &str, block: &Block) -> Result<(), BrokerError> {
        if self.seen.fetch_add(1, Ordering::SeqCst) >= self.ok {
            return Err(BrokerError::NotConfirmed(block.height));
        }
        self.inner.publish(topic, block).await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner.close().await
    }
}

/// `host:port` of a RabbitMQ broker for AMQP tests, from `CHAIN_ADAPTER_TEST_AMQP`.
pub fn amqp_endpoint() -> Option<(String, u16)> {
    let raw = std::env::var("CHAIN_ADAPTER_TEST_AMQP").ok()?;
    let (host, port) = raw.rsplit_once(':').unwrap_or((raw.as_str(), "5672"));
    Some((host.to_string(), port.parse().ok()?))
}
