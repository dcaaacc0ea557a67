//! Adapter: wires catch-up, the live path and the watermark together, and owns shutdown.
//!
//! Startup order matters. The live subscription is opened *before* catch-up so that no block
//! committed after process start can be missed; its consumer waits behind the gate. Catch-up
//! then runs to the chain head on the calling task, and only after its last watermark write
//! does the gate open. Blocks the subscription repeats are filtered against the watermark.

use crate::block::Height;
use crate::broker::{declare_fanout, Broker};
use crate::catchup::CatchUp;
use crate::config::{AdapterConfig, ConfigError};
use crate::error::AdapterError;
use crate::fatal::{fatal_channel, FatalReceiver, FatalSignal};
use crate::forwarder::{Gate, LiveForwarder};
use crate::ledger::{LedgerQuery, LedgerSubscription};
use crate::publisher::BlockPublisher;
use crate::watermark::WatermarkStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long `close` lets an in-flight live delivery finish before aborting the consumer.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Builder for [Adapter].
///
/// Create it first and hand [AdapterBuilder::fatal_signal] to collaborators that detect
/// failures asynchronously (e.g. the broker's connection-error callback).
pub struct AdapterBuilder {
    ledger: Option<Arc<dyn LedgerQuery>>,
    subscription: Option<Arc<dyn LedgerSubscription>>,
    broker: Option<Arc<dyn Broker>>,
    watermark: Option<Arc<dyn WatermarkStore>>,
    exchange: Option<String>,
    queues: Vec<String>,
    drop_last_read_block: bool,
    fatal: FatalSignal,
    fatal_rx: FatalReceiver,
}

impl AdapterBuilder {
    pub fn new() -> Self {
        let (fatal, fatal_rx) = fatal_channel();
        Self {
            ledger: None,
            subscription: None,
            broker: None,
            watermark: None,
            exchange: None,
            queues: Vec::new(),
            drop_last_read_block: false,
            fatal,
            fatal_rx,
        }
    }

    /// Exchange, queues and reset flag from `config`.
    pub fn config(self, config: &AdapterConfig) -> Self {
        self.exchange(config.exchange.clone())
            .queues(config.queues())
            .drop_last_read_block(config.drop_last_read_block)
    }

    /// Ledger used for both block queries and the live subscription.
    pub fn ledger<L>(mut self, ledger: Arc<L>) -> Self
    where
        L: LedgerQuery + LedgerSubscription + 'static,
    {
        self.ledger = Some(ledger.clone() as Arc<dyn LedgerQuery>);
        self.subscription = Some(ledger as Arc<dyn LedgerSubscription>);
        self
    }

    pub fn query(mut self, ledger: Arc<dyn LedgerQuery>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn subscription(mut self, subscription: Arc<dyn LedgerSubscription>) -> Self {
        self.subscription = Some(subscription);
        self
    }

    pub fn broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn watermark(mut self, watermark: Arc<dyn WatermarkStore>) -> Self {
        self.watermark = Some(watermark);
        self
    }

    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    pub fn queues(mut self, queues: Vec<String>) -> Self {
        self.queues = queues;
        self
    }

    pub fn drop_last_read_block(mut self, drop: bool) -> Self {
        self.drop_last_read_block = drop;
        self
    }

    /// Signal for collaborators that fail outside the adapter's call paths.
    pub fn fatal_signal(&self) -> FatalSignal {
        self.fatal.clone()
    }

    /// Declare the exchange and pre-provisioned queues, and assemble the adapter.
    ///
    /// If declaring fails the broker is closed before the error is returned.
    pub async fn build(self) -> Result<Adapter, AdapterError> {
        let ledger = self.ledger.ok_or(ConfigError::Missing("ledger query"))?;
        let subscription = self
            .subscription
            .ok_or(ConfigError::Missing("ledger subscription"))?;
        let broker = self.broker.ok_or(ConfigError::Missing("broker"))?;
        let watermark = self.watermark.ok_or(ConfigError::Missing("watermark"))?;
        let exchange = self.exchange.ok_or(ConfigError::Missing("exchange"))?;

        if let Err(e) = declare_fanout(broker.as_ref(), &exchange, &self.queues).await {
            if let Err(close_err) = broker.close().await {
                tracing::warn!(reason = %close_err, "cannot close broker");
            }
            return Err(e.into());
        }
        tracing::info!(exchange = %exchange, queues = self.queues.len(), "exchange declared");

        let publisher = Arc::new(BlockPublisher::new(Arc::clone(&broker), exchange, watermark));
        let (shutdown, _) = watch::channel(false);
        Ok(Adapter {
            ledger,
            subscription,
            broker,
            publisher,
            drop_last_read_block: self.drop_last_read_block,
            gate: Some(Gate::new()),
            shutdown,
            consumer: None,
            started: false,
            fatal: self.fatal,
            fatal_rx: self.fatal_rx,
        })
    }
}

impl Default for AdapterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Ledger-to-broker block forwarder.
pub struct Adapter {
    ledger: Arc<dyn LedgerQuery>,
    subscription: Arc<dyn LedgerSubscription>,
    broker: Arc<dyn Broker>,
    publisher: Arc<BlockPublisher>,
    drop_last_read_block: bool,
    gate: Option<Gate>,
    shutdown: watch::Sender<bool>,
    consumer: Option<JoinHandle<()>>,
    started: bool,
    fatal: FatalSignal,
    fatal_rx: FatalReceiver,
}

impl Adapter {
    pub fn builder() -> AdapterBuilder {
        AdapterBuilder::new()
    }

    /// Run the startup sequence. Returns once catch-up is done and the live path is flowing.
    ///
    /// On error the remaining steps are skipped; the caller should [Adapter::close] and exit.
    /// A fatal error reported while catch-up runs ends startup with that error.
    pub async fn start(&mut self) -> Result<(), AdapterError> {
        if self.started {
            return Err(AdapterError::AlreadyStarted);
        }
        self.started = true;

        if self.drop_last_read_block {
            tracing::info!("Drop last block");
            self.publisher.reset()?;
        }
        let watermark = self.publisher.load()?;
        tracing::info!(watermark, "Listening ledger blocks");

        let gate = self.gate.as_ref().ok_or(AdapterError::AlreadyStarted)?;
        let feed = self.subscription.subscribe().await?;
        let forwarder = LiveForwarder::new(Arc::clone(&self.publisher), gate.subscribe());
        self.consumer = Some(tokio::spawn(forwarder.run(
            feed,
            self.fatal.clone(),
            self.shutdown.subscribe(),
        )));

        // A stalled ledger query must not hide a broker loss reported meanwhile.
        let catch_up = CatchUp::new(Arc::clone(&self.ledger), Arc::clone(&self.publisher));
        let head = tokio::select! {
            biased;
            fatal = self.fatal_rx.recv() => {
                return Err(fatal.unwrap_or(AdapterError::FatalChannelClosed));
            }
            head = catch_up.run() => head?,
        };
        gate.open();
        tracing::info!(height = head, "Chain adapter has been started");
        Ok(())
    }

    /// Live view of the watermark.
    pub fn last_read_block(&self) -> Height {
        self.publisher.last_read_block()
    }

    /// True once catch-up has finished and the live path publishes.
    pub fn is_flowing(&self) -> bool {
        self.gate.as_ref().map(Gate::is_open).unwrap_or(false)
    }

    pub fn exchange(&self) -> &str {
        self.publisher.topic()
    }

    pub fn fatal_signal(&self) -> FatalSignal {
        self.fatal.clone()
    }

    /// Wait for the first fatal error from the live path or any collaborator.
    pub async fn run_until_fatal(&mut self) -> AdapterError {
        self.fatal_rx
            .recv()
            .await
            .unwrap_or(AdapterError::FatalChannelClosed)
    }

    /// Stop the live path and release broker and ledger resources.
    ///
    /// Best effort: failures are logged, never returned. Safe to call more than once.
    pub async fn close(&mut self) {
        let _ = self.shutdown.send(true);
        // Dropping the gate releases a consumer still waiting for catch-up.
        self.gate.take();
        if let Some(mut consumer) = self.consumer.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut consumer).await {
                Ok(Err(e)) if e.is_panic() => {
                    tracing::error!(reason = %e, "live forwarder panicked")
                }
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!("live forwarder did not stop in time, aborting");
                    consumer.abort();
                }
            }
        }
        if let Err(e) = self.broker.close().await {
            tracing::warn!(reason = %e, "cannot close broker");
        }
        if let Err(e) = self.ledger.close().await {
            tracing::warn!(reason = %e, "cannot close ledger");
        }
        tracing::info!("chain adapter closed");
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            consumer.abort();
        }
    }
}
