//! Example: run the adapter end to end on the in-memory ledger and broker.
//!
//! Commits some blocks, starts the adapter (catch-up), commits more (live path), and prints what
//! a listener on a pre-created queue receives.
//!
//! Usage: cargo run -p chain-adapter --example memory_pipeline -- --before N --after M --watermark PATH

use chain_adapter::{
    AdapterBuilder, BlockListener, FileWatermark, MemoryBroker, MemoryLedger, QueueSource,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const EXCHANGE: &str = "ledger-blocks";
const QUEUE: &str = "example-consumer";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args: Vec<String> = std::env::args().collect();
    let mut before = 5usize;
    let mut after = 5usize;
    let mut watermark_path = std::env::temp_dir().join("chain-adapter-example.txt");
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--before" => {
                i += 1;
                before = args.get(i).and_then(|v| v.parse().ok()).unwrap_or(before);
            }
            "--after" => {
                i += 1;
                after = args.get(i).and_then(|v| v.parse().ok()).unwrap_or(after);
            }
            "--watermark" => {
                i += 1;
                if let Some(p) = args.get(i) {
                    watermark_path = PathBuf::from(p);
                }
            }
            _ => {}
        }
        i += 1;
    }

    let ledger = Arc::new(MemoryLedger::new());
    ledger.commit_many(before);

    let builder = AdapterBuilder::new()
        .exchange(EXCHANGE)
        .queues(vec![QUEUE.to_string()]);
    let broker = Arc::new(MemoryBroker::new().with_fatal_signal(builder.fatal_signal()));
    let watermark = FileWatermark::open(&watermark_path)?;
    let mut adapter = builder
        .ledger(ledger.clone())
        .broker(broker.clone())
        .watermark(Arc::new(watermark))
        .build()
        .await?;
    adapter.start().await?;
    println!("caught up to block {}", adapter.last_read_block());

    let source: Arc<dyn QueueSource> = broker.clone();
    let listener = BlockListener::new(source, EXCHANGE, QUEUE, true);
    let mut feed = listener.listen().await?;

    let expected = broker.published(EXCHANGE).len() + after;
    ledger.commit_many(after);
    let mut received = 0;
    while received < expected {
        match tokio::time::timeout(Duration::from_secs(2), feed.next()).await {
            Ok(Some(Ok(delivery))) => {
                println!(
                    "block height={} payload={}",
                    delivery.block.height,
                    String::from_utf8_lossy(&delivery.block.payload)
                );
                received += 1;
            }
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(None) | Err(_) => break,
        }
    }

    println!(
        "forwarded {} blocks, watermark {} in {}",
        received,
        adapter.last_read_block(),
        watermark_path.display()
    );
    adapter.close().await;
    Ok(())
}
