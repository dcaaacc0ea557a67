//! Chain adapter: forwards every committed ledger block to a broker exchange exactly once, in
//! height order, resuming from a durable watermark after restarts.
//!
//! - **CatchUp**: on startup, pulls blocks `watermark+1..head` one at a time via [LedgerQuery]
//!   until the ledger reports [LedgerError::BeyondHead].
//! - **LiveForwarder**: consumes the [LedgerSubscription] feed, held behind a one-shot [Gate]
//!   until catch-up finishes, and drops blocks at or below the watermark.
//! - **Adapter**: orders the two, owns the [WatermarkStore], and turns any broker, ledger or
//!   watermark failure into a single fatal [AdapterError] for the process to exit on.

pub mod adapter;
pub mod amqp;
pub mod block;
pub mod broker;
pub mod catchup;
pub mod client;
pub mod config;
pub mod error;
pub mod fatal;
pub mod feed;
pub mod forwarder;
pub mod health;
pub mod ledger;
pub mod memory_broker;
pub mod memory_ledger;
pub mod publisher;
pub mod rpc;
pub mod watermark;

pub use adapter::{Adapter, AdapterBuilder};
pub use amqp::AmqpBroker;
pub use block::{decode_block, encode_block, Block, Height};
pub use broker::{declare_fanout, Broker, BrokerError, QueueFeed, QueueSource, HEIGHT_HEADER};
pub use catchup::CatchUp;
pub use client::BlockListener;
pub use config::{parse_queue_list, AdapterConfig, ConfigError};
pub use error::AdapterError;
pub use fatal::{fatal_channel, FatalReceiver, FatalSignal};
pub use feed::{AckError, Acknowledgement, Delivery, Feed};
pub use forwarder::{Forwarded, Gate, LiveForwarder};
pub use health::HealthCheckEndpoint;
pub use ledger::{BlockFeed, LedgerError, LedgerQuery, LedgerSubscription};
pub use memory_broker::MemoryBroker;
pub use memory_ledger::MemoryLedger;
pub use publisher::BlockPublisher;
pub use rpc::RpcLedger;
pub use watermark::{FileWatermark, MemoryWatermark, WatermarkError, WatermarkStore};
