//! Watchlist view model
//!
//! Last price and per-strategy status for every instrument. Patched by
//! `watchlist_ping` ticks and by lifecycle events of any strategy; never
//! touches the chart.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::backend::{Instrument, InstrumentStatus};
use crate::lifecycle::{LifecycleEvent, OrderStatus};
use crate::types::Side;

#[derive(Debug, Clone, PartialEq)]
pub struct WatchRow {
    pub symbol: String,
    pub last_price: Option<f64>,
    /// Epoch seconds of the last price tick
    pub updated_at: Option<i64>,
    /// strategy id -> status
    pub statuses: BTreeMap<String, InstrumentStatus>,
}

impl WatchRow {
    fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            last_price: None,
            updated_at: None,
            statuses: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Watchlist {
    rows: BTreeMap<String, WatchRow>,
}

impl Watchlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all rows with the instruments endpoint result, keeping
    /// fresher tick prices already received.
    pub fn load(&mut self, instruments: Vec<Instrument>) {
        let mut rows = BTreeMap::new();
        for inst in instruments {
            let mut row = WatchRow::new(&inst.symbol);
            row.last_price = (inst.last_price > 0.0).then_some(inst.last_price);
            if let Some(prev) = self.rows.get(&inst.symbol) {
                if prev.updated_at.is_some() {
                    row.last_price = prev.last_price;
                    row.updated_at = prev.updated_at;
                }
            }
            row.statuses = inst
                .strategies
                .into_iter()
                .map(|s| (s.strategy_id, s.status))
                .collect();
            rows.insert(inst.symbol, row);
        }
        self.rows = rows;
    }

    pub fn row(&self, symbol: &str) -> Option<&WatchRow> {
        self.rows.get(symbol)
    }

    pub fn rows(&self) -> impl Iterator<Item = &WatchRow> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Patch the displayed last price. Ticks older than the last one are ignored.
    pub fn patch_price(&mut self, symbol: &str, price: f64, time: Option<i64>) -> bool {
        if !price.is_finite() {
            return false;
        }
        let row = self
            .rows
            .entry(symbol.to_string())
            .or_insert_with(|| WatchRow::new(symbol));
        if let (Some(prev), Some(t)) = (row.updated_at, time) {
            if t < prev {
                return false;
            }
        }
        row.last_price = Some(price);
        row.updated_at = time.or(row.updated_at);
        true
    }

    pub fn set_status(&mut self, symbol: &str, strategy_id: &str, status: InstrumentStatus) -> bool {
        let row = self
            .rows
            .entry(symbol.to_string())
            .or_insert_with(|| WatchRow::new(symbol));
        row.statuses.insert(strategy_id.to_string(), status) != Some(status)
    }

    /// Derive the strategy status change carried by a lifecycle event
    pub fn apply_lifecycle(&mut self, event: &LifecycleEvent) -> bool {
        let current = self
            .rows
            .get(event.symbol())
            .and_then(|r| r.statuses.get(event.strategy_id()))
            .copied();
        let next = match event {
            LifecycleEvent::Position(e) if e.side == Side::Flat => InstrumentStatus::Wait,
            LifecycleEvent::Position(_) => InstrumentStatus::Intrade,
            LifecycleEvent::Order(e) => match (e.status, current) {
                (_, Some(InstrumentStatus::Intrade)) => return false,
                (Some(OrderStatus::Filled), _) => InstrumentStatus::Intrade,
                (Some(OrderStatus::Cancelled), _) => InstrumentStatus::Wait,
                _ => InstrumentStatus::Pending,
            },
            LifecycleEvent::TradeClosed(_) => InstrumentStatus::Wait,
        };
        self.set_status(event.symbol(), event.strategy_id(), next)
    }

    /// Plain-text table for the headless binary
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        for row in self.rows.values() {
            let price = row
                .last_price
                .map(|p| format!("{p}"))
                .unwrap_or_else(|| "-".to_string());
            let statuses: Vec<String> = row
                .statuses
                .iter()
                .map(|(s, st)| format!("{s}:{st:?}"))
                .collect();
            let _ = writeln!(out, "{:<14} {:>16}  {}", row.symbol, price, statuses.join(" "));
        }
        out
    }
}
