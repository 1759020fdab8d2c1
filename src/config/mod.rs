//! Configuration management for StratView
//!
//! Loads from YAML/TOML files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::render::Palette;
use crate::types::Selection;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub chart: ChartConfig,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// REST API base URL
    pub base_url: String,
    /// Push stream base URL; the strategy id is appended as a path segment
    pub ws_url: String,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartConfig {
    /// Candle resolution used when the strategy declares no timeframe
    pub resolution: String,
    /// Number of historical candles requested per snapshot
    pub candle_limit: usize,
    /// Delay before the full resync that follows a trade-closed event
    pub resync_delay_ms: u64,
    /// Marker budget for the trade timeline; whole trades are dropped oldest first
    pub max_markers: usize,
    /// Number of synthetic candles generated in fallback mode
    pub fallback_candles: usize,
    #[serde(default)]
    pub palette: Palette,
}

impl ChartConfig {
    pub fn resync_delay(&self) -> Duration {
        Duration::from_millis(self.resync_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Open push-stream subscriptions (disabled in offline runs)
    pub enabled: bool,
    pub ping_interval_secs: u64,
    /// Reconnect when nothing useful arrived for this long
    pub watchdog_silence_secs: u64,
    pub max_backoff_secs: u64,
    /// Inbound event channel capacity
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectionConfig {
    pub strategy_id: Option<String>,
    pub symbol: Option<String>,
}

impl SelectionConfig {
    /// Initial selection when both parts are configured
    pub fn initial(&self) -> Option<Selection> {
        match (&self.strategy_id, &self.symbol) {
            (Some(s), Some(sym)) if !s.is_empty() && !sym.is_empty() => {
                Some(Selection::new(s.clone(), sym.clone()))
            }
            _ => None,
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::builder()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (STRATVIEW__*)
            .add_source(Environment::with_prefix("STRATVIEW").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app_config.validate()?;

        Ok(app_config)
    }

    /// Defaults only, no files or environment
    pub fn defaults() -> Result<Self> {
        Self::builder()?
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(Config::builder()
            // Backend defaults
            .set_default("backend.base_url", "http://localhost:8000")?
            .set_default("backend.ws_url", "ws://localhost:8000/ws")?
            .set_default("backend.request_timeout_ms", 10_000)?
            // Chart defaults
            .set_default("chart.resolution", "5")?
            .set_default("chart.candle_limit", 200)?
            .set_default("chart.resync_delay_ms", 1500)?
            .set_default("chart.max_markers", 500)?
            .set_default("chart.fallback_candles", 200)?
            // Stream defaults
            .set_default("stream.enabled", true)?
            .set_default("stream.ping_interval_secs", 15)?
            .set_default("stream.watchdog_silence_secs", 60)?
            .set_default("stream.max_backoff_secs", 30)?
            .set_default("stream.channel_capacity", 1024)?
            // Logging defaults
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chart.candle_limit == 0 {
            bail!("chart.candle_limit must be greater than zero");
        }
        if self.chart.fallback_candles == 0 {
            bail!("chart.fallback_candles must be greater than zero");
        }
        if self.stream.channel_capacity == 0 {
            bail!("stream.channel_capacity must be greater than zero");
        }
        if !self.backend.ws_url.starts_with("ws://") && !self.backend.ws_url.starts_with("wss://")
        {
            bail!("backend.ws_url must be a ws:// or wss:// URL");
        }
        Ok(())
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "api={} ws={} resolution={} candles={} resync_ms={} stream={}",
            self.backend.base_url,
            self.backend.ws_url,
            self.chart.resolution,
            self.chart.candle_limit,
            self.chart.resync_delay_ms,
            self.stream.enabled
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
