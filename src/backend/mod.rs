//! Backend boundary
//!
//! Historical candles, trade history, position/order state, strategy
//! metadata and the instrument list are produced upstream; this module only
//! fetches them.

mod http;

pub use http::{sanitize_non_finite, HttpBackend};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::types::{Candle, InstrumentState, StrategyMeta, TradeRecord};

/// Trading status of one strategy on one instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstrumentStatus {
    Wait,
    Pending,
    #[serde(alias = "IN_TRADE")]
    Intrade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentStrategy {
    pub strategy_id: String,
    #[serde(default)]
    pub strategy_name: Option<String>,
    pub status: InstrumentStatus,
}

/// Watchlist row as returned by the instruments endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    #[serde(default)]
    pub last_price: f64,
    #[serde(default)]
    pub strategies: Vec<InstrumentStrategy>,
}

/// Read-only access to the strategy backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    /// `GET /strategies/{id}/candles/{symbol}/{resolution}`
    async fn fetch_candles(
        &self,
        strategy_id: &str,
        symbol: &str,
        resolution: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError>;

    /// `GET /strategies/{id}/trades?symbol=...`
    async fn fetch_trades(
        &self,
        strategy_id: &str,
        symbol: &str,
    ) -> Result<Vec<TradeRecord>, FetchError>;

    /// `GET /strategies/{id}/state/{symbol}`
    async fn fetch_state(
        &self,
        strategy_id: &str,
        symbol: &str,
    ) -> Result<InstrumentState, FetchError>;

    /// `GET /strategies`
    async fn fetch_strategies(&self) -> Result<Vec<StrategyMeta>, FetchError>;

    /// `GET /instruments`
    async fn fetch_instruments(&self) -> Result<Vec<Instrument>, FetchError>;
}
