//! JSON-RPC ledger client.
//!
//! Queries blocks over HTTP (`ledger_getBlock`) and follows new blocks over WebSocket
//! (`ledger_subscribe` / `ledger_subscription` notifications).

use crate::block::{decode_block, Block, Height};
use crate::feed::{Delivery, Feed, FeedSender};
use crate::ledger::{BlockFeed, LedgerError, LedgerQuery, LedgerSubscription};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Error code the ledger returns for a block height past its head.
pub const BEYOND_HEAD_ERROR_CODE: i64 = 3;

const SUBSCRIBE_ID: u64 = 1;

async fn http_json_rpc(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Value,
    id: u64,
) -> Result<Value, LedgerError> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    });
    let resp = client.post(url).json(&body).send().await?;
    let json: Value = resp.json().await?;
    if let Some(err) = json.get("error") {
        return Err(rpc_error(err));
    }
    json.get("result")
        .cloned()
        .ok_or_else(|| LedgerError::Decode("Missing result".into()))
}

fn rpc_error(err: &Value) -> LedgerError {
    LedgerError::Rpc {
        code: err.get("code").and_then(|c| c.as_i64()).unwrap_or_default(),
        message: err
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string()),
    }
}

/// Extract the block from a `ledger_subscription` notification. Other messages yield None.
pub(crate) fn parse_notification(text: &str) -> Result<Option<Block>, LedgerError> {
    let v: Value =
        serde_json::from_str(text).map_err(|e| LedgerError::Decode(format!("ws message: {}", e)))?;
    if v.get("method").and_then(|m| m.as_str()) != Some("ledger_subscription") {
        return Ok(None);
    }
    let result = v
        .get("params")
        .and_then(|p| p.get("result"))
        .ok_or_else(|| LedgerError::Decode("no params.result".into()))?;
    decode_block(result)
        .map(Some)
        .map_err(|e| LedgerError::Decode(e.to_string()))
}

/// Ledger reachable over JSON-RPC.
#[derive(Debug, Clone)]
pub struct RpcLedger {
    http_client: reqwest::Client,
    http_url: String,
    ws_url: String,
}

impl RpcLedger {
    pub fn new(http_url: impl Into<String>, ws_url: impl Into<String>) -> Result<Self, LedgerError> {
        let http_client = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self {
            http_client,
            http_url: http_url.into(),
            ws_url: ws_url.into(),
        })
    }

    pub fn http_url(&self) -> &str {
        &self.http_url
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }
}

#[async_trait]
impl LedgerQuery for RpcLedger {
    async fn get_block(&self, height: Height) -> Result<Block, LedgerError> {
        let params = json!([format!("0x{:x}", height)]);
        let result = match http_json_rpc(
            &self.http_client,
            &self.http_url,
            "ledger_getBlock",
            params,
            height,
        )
        .await
        {
            Ok(r) => r,
            Err(LedgerError::Rpc { code, .. }) if code == BEYOND_HEAD_ERROR_CODE => {
                return Err(LedgerError::BeyondHead(height));
            }
            Err(e) => return Err(e),
        };
        let block = decode_block(&result).map_err(|e| LedgerError::Decode(e.to_string()))?;
        if block.height != height {
            return Err(LedgerError::UnexpectedHeight {
                expected: height,
                actual: block.height,
            });
        }
        Ok(block)
    }
}

#[async_trait]
impl LedgerSubscription for RpcLedger {
    async fn subscribe(&self) -> Result<BlockFeed, LedgerError> {
        let (ws_stream, _) = connect_async(&self.ws_url)
            .await
            .map_err(|e| LedgerError::WebSocket(format!("connect: {}", e)))?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let sub_req = json!({
            "jsonrpc": "2.0",
            "id": SUBSCRIBE_ID,
            "method": "ledger_subscribe",
            "params": ["newBlocks"]
        });
        let text = serde_json::to_string(&sub_req).map_err(|e| LedgerError::Decode(e.to_string()))?;
        ws_sender
            .send(Message::Text(text))
            .await
            .map_err(|e| LedgerError::WebSocket(format!("send subscribe: {}", e)))?;

        let sub_id = loop {
            let msg = ws_receiver
                .next()
                .await
                .ok_or(LedgerError::Closed)?
                .map_err(|e| LedgerError::WebSocket(e.to_string()))?;
            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => return Err(LedgerError::Closed),
                _ => continue,
            };
            let v: Value = serde_json::from_str(&text)
                .map_err(|e| LedgerError::Decode(format!("sub response: {}", e)))?;
            if v.get("id").and_then(|i| i.as_u64()) != Some(SUBSCRIBE_ID) {
                continue;
            }
            if let Some(err) = v.get("error") {
                return Err(rpc_error(err));
            }
            break v
                .get("result")
                .and_then(|r| r.as_str())
                .ok_or_else(|| LedgerError::Decode("no subscription id".into()))?
                .to_string();
        };
        tracing::info!(subscription = %sub_id, url = %self.ws_url, "subscribed to new ledger blocks");

        let (tx, feed) = Feed::channel();
        let task = tokio::spawn(async move {
            // Keep the sink alive for the lifetime of the subscription.
            let _ws_sender = ws_sender;
            forward_notifications(&mut ws_receiver, &tx).await;
        });
        Ok(feed.with_task(task))
    }
}

async fn forward_notifications<S>(ws_receiver: &mut S, tx: &FeedSender<LedgerError>)
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                let _ = tx.send(Err(LedgerError::WebSocket(e.to_string())));
                return;
            }
        };
        match parse_notification(&text) {
            Ok(Some(block)) => {
                tracing::debug!(height = block.height, "ledger block notification");
                if tx.send(Ok(Delivery::auto(block))).is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        }
    }
    let _ = tx.send(Err(LedgerError::Closed));
}
