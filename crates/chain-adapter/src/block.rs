//! Ledger blocks: opaque payload plus height.
//!
//! Decode from the JSON-RPC block shape `{"height": "0x..", "payload": "0x.."}` used by
//! `ledger_getBlock` results and `ledger_subscription` notifications.

use anyhow::{Context, Result};
use serde_json::{json, Value};

/// Position of a block in the chain. Zero means "nothing read yet".
pub type Height = u64;

/// A committed ledger block. The payload is forwarded as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub height: Height,
    pub payload: Vec<u8>,
}

impl Block {
    pub fn new(height: Height, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            height,
            payload: payload.into(),
        }
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Decode a JSON-RPC block object into [Block].
pub fn decode_block(value: &Value) -> Result<Block> {
    let height = parse_height(
        value
            .get("height")
            .ok_or_else(|| anyhow::anyhow!("Missing height"))?,
    )?;
    let payload = parse_hex_bytes(
        value
            .get("payload")
            .and_then(|p| p.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing payload"))?,
    )?;
    Ok(Block { height, payload })
}

/// Encode a block into the JSON-RPC block shape (inverse of [decode_block]).
pub fn encode_block(block: &Block) -> Value {
    json!({
        "height": format!("0x{:x}", block.height),
        "payload": format!("0x{}", hex::encode(&block.payload)),
    })
}

/// Heights arrive as `0x`-prefixed hex strings; plain decimal numbers are accepted too.
fn parse_height(value: &Value) -> Result<Height> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| anyhow::anyhow!("height is not a non-negative integer: {}", n)),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(hex_digits) => u64::from_str_radix(hex_digits, 16).context("parse hex height"),
            None => s.parse::<u64>().context("parse decimal height"),
        },
        other => anyhow::bail!("height has unexpected type: {}", other),
    }
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).context("parse hex payload")
}
