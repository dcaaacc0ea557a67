//! Example: listen on a queue bound to the adapter's exchange and print each block.
//!
//! Usage: cargo run -p chain-adapter --example block_listener -- --host HOST --port PORT --exchange NAME --queue NAME [--manual-ack]

use chain_adapter::{fatal_channel, AmqpBroker, BlockListener, Broker, QueueSource};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args: Vec<String> = std::env::args().collect();
    let mut host = "localhost".to_string();
    let mut port = 5672u16;
    let mut exchange = String::new();
    let mut queue = String::new();
    let mut manual_ack = false;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                i += 1;
                host = args.get(i).cloned().unwrap_or(host);
            }
            "--port" => {
                i += 1;
                port = args.get(i).and_then(|p| p.parse().ok()).unwrap_or(port);
            }
            "--exchange" => {
                i += 1;
                exchange = args.get(i).cloned().unwrap_or_default();
            }
            "--queue" => {
                i += 1;
                queue = args.get(i).cloned().unwrap_or_default();
            }
            "--manual-ack" => manual_ack = true,
            _ => {}
        }
        i += 1;
    }
    if exchange.is_empty() || queue.is_empty() {
        eprintln!("Usage: block_listener --host HOST --port PORT --exchange NAME --queue NAME [--manual-ack]");
        std::process::exit(1);
    }

    let (fatal, mut fatal_rx) = fatal_channel();
    let broker: Arc<dyn QueueSource> = Arc::new(AmqpBroker::connect(&host, port, fatal).await?);
    let listener = BlockListener::new(broker.clone(), exchange, queue, !manual_ack);
    let mut feed = listener.listen().await?;

    loop {
        tokio::select! {
            item = feed.next() => match item {
                Some(Ok(delivery)) => {
                    println!(
                        "block height={} payload_len={} payload=0x{}",
                        delivery.block.height,
                        delivery.block.payload.len(),
                        hex::encode(&delivery.block.payload)
                    );
                    if let Some(ack) = delivery.ack {
                        ack.ack().await?;
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            },
            Some(err) = fatal_rx.recv() => return Err(err.into()),
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    feed.close();
    broker.close().await?;
    Ok(())
}
