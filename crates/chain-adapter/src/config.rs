//! Adapter configuration.
//!
//! Loaded from an optional JSON file, then overridden by `CHAIN_ADAPTER_*` environment variables
//! (e.g. `CHAIN_ADAPTER_RMQ_HOST`, `CHAIN_ADAPTER_DROP_LAST_READ_BLOCK`).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "CHAIN_ADAPTER_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("{0} is required")]
    Missing(&'static str),
}

/// Adapter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// RMQ hostname.
    pub rmq_host: String,
    /// RMQ port.
    pub rmq_port: u16,
    /// Fanout exchange that ledger blocks are broadcast to.
    pub exchange: String,
    /// Comma-separated durable queues to pre-create and bind to the exchange.
    pub queues_to_create: String,
    /// Ledger JSON-RPC HTTP endpoint (block queries).
    pub ledger_http_url: String,
    /// Ledger JSON-RPC WebSocket endpoint (new block subscription).
    pub ledger_ws_url: String,
    /// File holding the last published block height.
    pub last_read_block_file_path: PathBuf,
    /// Reset the watermark to 0 on startup and replay the whole chain.
    pub drop_last_read_block: bool,
    /// Health check port. 0 disables the endpoint.
    pub health_check_port: u16,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            rmq_host: "localhost".into(),
            rmq_port: 5672,
            exchange: "ledger-blocks".into(),
            queues_to_create: String::new(),
            ledger_http_url: "http://127.0.0.1:50051".into(),
            ledger_ws_url: "ws://127.0.0.1:50052".into(),
            last_read_block_file_path: PathBuf::from("deploy/chain-adapter/last_read_block.txt"),
            drop_last_read_block: false,
            health_check_port: 0,
        }
    }
}

/// Split a comma-separated queue list, trimming entries and skipping empty ones.
pub fn parse_queue_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl AdapterConfig {
    /// Parsed queue list.
    pub fn queues(&self) -> Vec<String> {
        parse_queue_list(&self.queues_to_create)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Apply `CHAIN_ADAPTER_*` overrides from `vars`. Unknown keys are ignored.
    pub fn apply_env<I>(mut self, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "RMQ_HOST" => self.rmq_host = value,
                "RMQ_PORT" => self.rmq_port = parse_port(&key, &value)?,
                "EXCHANGE" => self.exchange = value,
                "QUEUES_TO_CREATE" => self.queues_to_create = value,
                "LEDGER_HTTP_URL" => self.ledger_http_url = value,
                "LEDGER_WS_URL" => self.ledger_ws_url = value,
                "LAST_READ_BLOCK_FILE_PATH" => self.last_read_block_file_path = PathBuf::from(value),
                "DROP_LAST_READ_BLOCK" => self.drop_last_read_block = parse_bool(&key, &value)?,
                "HEALTH_CHECK_PORT" => self.health_check_port = parse_port(&key, &value)?,
                _ => tracing::debug!(key = %key, "ignoring unknown config variable"),
            }
        }
        Ok(self)
    }

    /// Defaults, then `file` (if any), then the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match file {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        let config = base.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exchange.trim().is_empty() {
            return Err(ConfigError::Missing("exchange"));
        }
        if self.rmq_host.trim().is_empty() {
            return Err(ConfigError::Missing("rmq_host"));
        }
        if self.ledger_http_url.trim().is_empty() {
            return Err(ConfigError::Missing("ledger_http_url"));
        }
        if self.ledger_ws_url.trim().is_empty() {
            return Err(ConfigError::Missing("ledger_ws_url"));
        }
        if self.last_read_block_file_path.as_os_str().is_empty() {
            return Err(ConfigError::Missing("last_read_block_file_path"));
        }
        Ok(())
    }
}
