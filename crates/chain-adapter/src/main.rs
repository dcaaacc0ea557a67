//! chain-adapter: forward ledger blocks to RabbitMQ.
//!
//! Usage: chain-adapter [--config <path.json>]
//!
//! Settings come from the optional JSON file and `CHAIN_ADAPTER_*` environment variables.
//! Any startup or runtime failure exits with status 1 after best-effort cleanup.

use chain_adapter::{
    AdapterBuilder, AdapterConfig, AdapterError, AmqpBroker, FileWatermark, HealthCheckEndpoint,
    RpcLedger,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn parse_args() -> Option<PathBuf> {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = args.get(i).map(PathBuf::from);
            }
            "--help" | "-h" => {
                eprintln!("Usage: chain-adapter [--config <path.json>]");
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }
    config_path
}

async fn run(config: AdapterConfig) -> Result<(), AdapterError> {
    if config.health_check_port != 0 {
        HealthCheckEndpoint::on_port(config.health_check_port)
            .start()
            .await
            .map_err(AdapterError::Health)?;
    }

    let builder = AdapterBuilder::new().config(&config);
    let watermark = FileWatermark::open(&config.last_read_block_file_path)?;
    let ledger = RpcLedger::new(&config.ledger_http_url, &config.ledger_ws_url)?;
    let broker = AmqpBroker::connect(&config.rmq_host, config.rmq_port, builder.fatal_signal()).await?;
    let mut adapter = builder
        .ledger(Arc::new(ledger))
        .broker(Arc::new(broker))
        .watermark(Arc::new(watermark))
        .build()
        .await?;

    if let Err(e) = adapter.start().await {
        adapter.close().await;
        return Err(e);
    }

    let outcome = tokio::select! {
        err = adapter.run_until_fatal() => Err(err),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
            Ok(())
        }
    };
    adapter.close().await;
    outcome
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chain_adapter=info")),
        )
        .init();

    let config = match AdapterConfig::load(parse_args().as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(reason = %e, "Cannot load chain-adapter config");
            std::process::exit(1);
        }
    };
    tracing::info!(
        exchange = %config.exchange,
        rmq = %format!("{}:{}", config.rmq_host, config.rmq_port),
        ledger = %config.ledger_http_url,
        "starting chain-adapter"
    );

    if let Err(e) = run(config).await {
        tracing::error!(reason = %e, "chain-adapter failed. Exit.");
        std::process::exit(1);
    }
}
