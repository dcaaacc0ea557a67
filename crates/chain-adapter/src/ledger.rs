//! Ledger capabilities consumed by the adapter: query a block by height, and subscribe to
//! newly committed blocks.

use crate::block::{Block, Height};
use crate::feed::Feed;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The requested height is past the current chain head. Ends catch-up; not a failure.
    #[error("height {0} is beyond the chain head")]
    BeyondHead(Height),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("expected block {expected}, ledger returned block {actual}")]
    UnexpectedHeight { expected: Height, actual: Height },

    #[error("ledger subscription closed")]
    Closed,

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Live feed of committed blocks.
pub type BlockFeed = Feed<LedgerError>;

/// Pull access to committed blocks.
#[async_trait]
pub trait LedgerQuery: Send + Sync {
    /// Block at `height`, or [LedgerError::BeyondHead] if the chain is not that tall yet.
    async fn get_block(&self, height: Height) -> Result<Block, LedgerError>;

    /// Release connections. Best effort.
    async fn close(&self) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// Push access to newly committed blocks.
///
/// The feed starts no later than the call and may repeat blocks also reachable through
/// [LedgerQuery]; callers deduplicate.
#[async_trait]
pub trait LedgerSubscription: Send + Sync {
    async fn subscribe(&self) -> Result<BlockFeed, LedgerError>;
}
