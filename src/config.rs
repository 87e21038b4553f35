//! Configuration management for the admission layer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 1024 blocks at ~12 seconds each
pub const DEFAULT_FEE_CACHE_TTL_SECS: u64 = 1024 * 12;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SYNC_SEND_TIMEOUT_SECS: u64 = 60 * 3;
pub const DEFAULT_SYNC_SEND_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_CONFIRMER_QUEUE_SIZE: usize = 4096;
pub const DEFAULT_NONCE_CACHE_CAPACITY: usize = 1024;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub client: ClientConfig,
    #[serde(default)]
    pub confirmer: ConfirmerConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub endpoint: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_sync_send_timeout_secs")]
    pub sync_send_timeout_secs: u64,
    #[serde(default = "default_sync_send_poll_interval_ms")]
    pub sync_send_poll_interval_ms: u64,
    #[serde(default = "default_fee_cache_ttl_secs")]
    pub tip_cache_ttl_secs: u64,
    #[serde(default = "default_fee_cache_ttl_secs")]
    pub base_fee_cache_ttl_secs: u64,
    /// Flat price used when the endpoint has no base fee
    #[serde(default)]
    pub static_gas_price_wei: u64,
    #[serde(default = "default_nonce_cache_capacity")]
    pub nonce_cache_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmerConfig {
    #[serde(default = "default_confirmer_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_confirmer_workers")]
    pub workers: usize,
    #[serde(default = "default_confirmer_worker_interval_ms")]
    pub worker_interval_ms: u64,
    /// Falls back to the recommended depth for the connected chain
    pub confirmation_blocks: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletConfig {
    pub private_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_sync_send_timeout_secs() -> u64 {
    DEFAULT_SYNC_SEND_TIMEOUT_SECS
}

fn default_sync_send_poll_interval_ms() -> u64 {
    DEFAULT_SYNC_SEND_POLL_INTERVAL_MS
}

fn default_fee_cache_ttl_secs() -> u64 {
    DEFAULT_FEE_CACHE_TTL_SECS
}

fn default_nonce_cache_capacity() -> usize {
    DEFAULT_NONCE_CACHE_CAPACITY
}

fn default_confirmer_queue_size() -> usize {
    DEFAULT_CONFIRMER_QUEUE_SIZE
}

fn default_confirmer_workers() -> usize {
    1
}

fn default_confirmer_worker_interval_ms() -> u64 {
    1000
}

impl ClientConfig {
    /// Client config with defaults for everything but the endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            sync_send_timeout_secs: DEFAULT_SYNC_SEND_TIMEOUT_SECS,
            sync_send_poll_interval_ms: DEFAULT_SYNC_SEND_POLL_INTERVAL_MS,
            tip_cache_ttl_secs: DEFAULT_FEE_CACHE_TTL_SECS,
            base_fee_cache_ttl_secs: DEFAULT_FEE_CACHE_TTL_SECS,
            static_gas_price_wei: 0,
            nonce_cache_capacity: DEFAULT_NONCE_CACHE_CAPACITY,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sync_send_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_send_timeout_secs)
    }

    pub fn sync_send_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync_send_poll_interval_ms)
    }

    pub fn tip_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.tip_cache_ttl_secs)
    }

    pub fn base_fee_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.base_fee_cache_ttl_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            anyhow::bail!("client.endpoint must be set");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("client.request_timeout_secs should be positive");
        }
        if self.sync_send_timeout_secs == 0 {
            anyhow::bail!("client.sync_send_timeout_secs should be positive");
        }
        if self.sync_send_poll_interval_ms == 0 {
            anyhow::bail!("client.sync_send_poll_interval_ms should be positive");
        }
        if self.tip_cache_ttl_secs == 0 || self.base_fee_cache_ttl_secs == 0 {
            anyhow::bail!("fee cache TTLs should be positive");
        }
        if self.nonce_cache_capacity == 0 {
            anyhow::bail!("client.nonce_cache_capacity should be at least 1");
        }
        Ok(())
    }
}

impl ConfirmerConfig {
    pub fn worker_interval(&self) -> Duration {
        Duration::from_millis(self.worker_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.queue_size == 0 {
            anyhow::bail!("confirmer.queue_size should be at least 1");
        }
        if self.workers == 0 {
            anyhow::bail!("confirmer.workers should be at least 1");
        }
        if self.worker_interval_ms == 0 {
            anyhow::bail!("confirmer.worker_interval_ms should be positive");
        }
        Ok(())
    }
}

impl Default for ConfirmerConfig {
    fn default() -> Self {
        Self {
            queue_size: default_confirmer_queue_size(),
            workers: default_confirmer_workers(),
            worker_interval_ms: default_confirmer_worker_interval_ms(),
            confirmation_blocks: None,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

impl Settings {
    /// Load settings from `$TX_ADMISSION_CONFIG` or `config/default.toml`
    pub fn load() -> Result<Self> {
        let config_path = env::var("TX_ADMISSION_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    /// Parse settings from TOML text, substituting `${VAR}` references
    pub fn parse(config_str: &str) -> Result<Self> {
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        self.client.validate()?;
        self.confirmer.validate()?;

        if self.wallet.private_key_env.is_none() {
            tracing::warn!("No wallet configured - sending requires explicit identities");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    ENV_VAR
        .replace_all(input, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}
