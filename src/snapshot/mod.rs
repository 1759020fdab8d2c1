//! Snapshot Loader
//!
//! Fetches historical candles and the strategy's indicator schema for a
//! selection. Any failure substitutes a deterministic synthetic series so
//! downstream code never special-cases "no data".

pub mod synthetic;

use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::error::FetchError;
use crate::types::{resolution_secs, Candle, IndicatorSchema, Selection};

/// Price display precision derived from a reference price
pub fn price_precision(price: f64) -> u32 {
    let p = price.abs();
    if p < 0.001 {
        8
    } else if p < 0.1 {
        6
    } else if p < 1.0 {
        4
    } else {
        2
    }
}

/// Sort by time and keep the last record for duplicate times
pub fn normalize_series(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by_key(|c| c.time);
    let mut out: Vec<Candle> = Vec::with_capacity(candles.len());
    for c in candles {
        match out.last_mut() {
            Some(last) if last.time == c.time => *last = c,
            _ => out.push(c),
        }
    }
    out
}

/// Everything the chart pipeline needs for one selection
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub selection: Selection,
    pub candles: Vec<Candle>,
    pub schema: IndicatorSchema,
    pub resolution: String,
    /// Decimal places for the price axis, from the first close
    pub precision: u32,
    /// True when any part was generated locally
    pub synthetic: bool,
}

pub struct SnapshotLoader {
    backend: Arc<dyn Backend>,
    default_resolution: String,
    candle_limit: usize,
    fallback_candles: usize,
}

impl SnapshotLoader {
    pub fn new(
        backend: Arc<dyn Backend>,
        default_resolution: &str,
        candle_limit: usize,
        fallback_candles: usize,
    ) -> Self {
        Self {
            backend,
            default_resolution: default_resolution.to_string(),
            candle_limit,
            fallback_candles,
        }
    }

    /// Load candles and schema; never fails
    pub async fn load(&self, selection: &Selection) -> Snapshot {
        let meta = match self.backend.fetch_strategies().await {
            Ok(list) => {
                let found = list
                    .into_iter()
                    .find(|m| m.strategy_id == selection.strategy_id);
                if found.is_none() {
                    warn!(strategy = %selection.strategy_id, "Strategy metadata not found; using fallback schema");
                }
                found
            }
            Err(e) => {
                warn!(strategy = %selection.strategy_id, kind = e.kind(), error = %e, "Strategy metadata fetch failed; using fallback schema");
                None
            }
        };

        let mut synthetic = meta.is_none();
        let (schema, resolution) = match meta {
            Some(m) => (
                IndicatorSchema::from_value(&m.indicators_config),
                m.timeframes
                    .first()
                    .cloned()
                    .unwrap_or_else(|| self.default_resolution.clone()),
            ),
            None => (synthetic::fallback_schema(), self.default_resolution.clone()),
        };

        let fetched = self
            .backend
            .fetch_candles(
                &selection.strategy_id,
                &selection.symbol,
                &resolution,
                self.candle_limit,
            )
            .await
            .and_then(|candles| {
                if candles.is_empty() {
                    Err(FetchError::NotFound(format!("no candles for {selection}")))
                } else {
                    Ok(candles)
                }
            });

        let candles = match fetched {
            Ok(candles) => normalize_series(candles),
            Err(e) => {
                warn!(
                    selection = %selection,
                    kind = e.kind(),
                    error = %e,
                    "Candle fetch failed; generating synthetic series"
                );
                synthetic = true;
                let step = resolution_secs(&resolution);
                let now = chrono::Utc::now().timestamp();
                synthetic::fallback_candles(
                    selection,
                    &schema,
                    self.fallback_candles,
                    step,
                    now - now.rem_euclid(step),
                )
            }
        };

        let precision = candles.first().map(|c| price_precision(c.close)).unwrap_or(2);
        info!(
            selection = %selection,
            candles = candles.len(),
            panes = schema.panes.len(),
            precision,
            synthetic,
            "Snapshot loaded"
        );

        Snapshot {
            selection: selection.clone(),
            candles,
            schema,
            resolution,
            precision,
            synthetic,
        }
    }
}
