//! Adapter-level error. Every variant is fatal to the running adapter.

use crate::broker::BrokerError;
use crate::config::ConfigError;
use crate::feed::AckError;
use crate::ledger::LedgerError;
use crate::watermark::WatermarkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("watermark: {0}")]
    Watermark(#[from] WatermarkError),

    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("broker: {0}")]
    Broker(#[from] BrokerError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Ack(#[from] AckError),

    #[error("health check endpoint: {0}")]
    Health(#[source] std::io::Error),

    #[error("adapter already started")]
    AlreadyStarted,

    #[error("fatal channel closed")]
    FatalChannelClosed,
}
