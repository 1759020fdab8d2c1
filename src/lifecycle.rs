//! Position/Order Lifecycle Tracker
//!
//! FLAT (no position, maybe a pending order) or OPEN(position). Driven by
//! push events scoped to the active selection; seeded once per load from
//! the state endpoint.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::{InstrumentState, Order, Position, Selection, Side};

// ─────────────────────────────────────────────────────────────────
// Event payloads
// ─────────────────────────────────────────────────────────────────

/// Position opened, changed or closed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionStateEvent {
    pub strategy_id: String,
    pub symbol: String,
    pub side: Side,
    #[serde(default)]
    pub size: f64,
    #[serde(default)]
    pub entry_price: f64,
    #[serde(default, alias = "unrealized_pnl")]
    pub unrealised_pnl: f64,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
}

impl PositionStateEvent {
    /// None for FLAT
    pub fn to_position(&self) -> Option<Position> {
        (self.side != Side::Flat).then(|| Position {
            symbol: self.symbol.clone(),
            side: self.side,
            entry_price: self.entry_price,
            take_profit: self.take_profit,
            stop_loss: self.stop_loss,
            unrealized_pnl: self.unrealised_pnl,
            size: Some(self.size),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Filled,
    PartiallyFilled,
    Cancelled,
    #[serde(other)]
    Other,
}

/// Order placed, filled or cancelled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderExecutionEvent {
    pub strategy_id: String,
    pub symbol: String,
    #[serde(default)]
    pub order_id: String,
    #[serde(default = "default_order_type")]
    pub order_type: String,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub qty: Option<f64>,
    #[serde(default)]
    pub status: Option<OrderStatus>,
}

fn default_order_type() -> String {
    "LIMIT".to_string()
}

impl OrderExecutionEvent {
    pub fn to_order(&self) -> Order {
        Order {
            order_type: self.order_type.clone(),
            price: self.price,
            side: self.side.clone(),
        }
    }
}

/// Position closed by take-profit or stop-loss
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeTerminalEvent {
    pub strategy_id: String,
    pub symbol: String,
    #[serde(default)]
    pub trigger_type: Option<String>,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub pnl: Option<f64>,
    #[serde(default)]
    pub realised_pnl: Option<f64>,
}

/// Lifecycle event decoded from an `update` push message
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Position(PositionStateEvent),
    Order(OrderExecutionEvent),
    TradeClosed(TradeTerminalEvent),
}

impl LifecycleEvent {
    pub fn strategy_id(&self) -> &str {
        match self {
            LifecycleEvent::Position(e) => &e.strategy_id,
            LifecycleEvent::Order(e) => &e.strategy_id,
            LifecycleEvent::TradeClosed(e) => &e.strategy_id,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            LifecycleEvent::Position(e) => &e.symbol,
            LifecycleEvent::Order(e) => &e.symbol,
            LifecycleEvent::TradeClosed(e) => &e.symbol,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Position(_) => "PositionStateEvent",
            LifecycleEvent::Order(_) => "OrderExecutionEvent",
            LifecycleEvent::TradeClosed(_) => "TradeTerminalEvent",
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tracker
// ─────────────────────────────────────────────────────────────────

/// Current lifecycle state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionState<'a> {
    Flat { pending: Option<&'a Order> },
    Open(&'a Position),
}

/// Result of applying one event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transition {
    /// Risk lines must be cleared and rebuilt
    pub risk_changed: bool,
    /// A full resync should be scheduled
    pub resync: bool,
}

#[derive(Debug, Default)]
pub struct LifecycleTracker {
    position: Option<Position>,
    order: Option<Order>,
    revision: u64,
    live_events: u64,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PositionState<'_> {
        match &self.position {
            Some(p) => PositionState::Open(p),
            None => PositionState::Flat {
                pending: self.order.as_ref(),
            },
        }
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn order(&self) -> Option<&Order> {
        self.order.as_ref()
    }

    /// Bumped whenever position or order changes
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Events applied since the last reset
    pub fn live_events(&self) -> u64 {
        self.live_events
    }

    /// Back to FLAT with no order (reselection)
    pub fn reset(&mut self) {
        if self.position.is_some() || self.order.is_some() {
            self.revision += 1;
        }
        self.position = None;
        self.order = None;
        self.live_events = 0;
    }

    /// Adopt fetched state. Returns true when anything changed.
    pub fn seed(&mut self, state: InstrumentState) -> bool {
        let position = state.position.filter(|p| p.side != Side::Flat);
        if position == self.position && state.order == self.order {
            return false;
        }
        self.position = position;
        self.order = state.order;
        self.revision += 1;
        true
    }

    /// Apply a push event. Events for another selection are ignored.
    pub fn apply(&mut self, selection: &Selection, event: &LifecycleEvent) -> Transition {
        if !selection.matches(event.strategy_id(), event.symbol()) {
            debug!(
                event = event.name(),
                strategy = %event.strategy_id(),
                symbol = %event.symbol(),
                "Lifecycle event for another selection ignored"
            );
            return Transition::default();
        }
        self.live_events += 1;

        match event {
            LifecycleEvent::Position(e) => {
                let next = e.to_position();
                info!(
                    selection = %selection,
                    side = %e.side,
                    entry = e.entry_price,
                    "Position state"
                );
                self.position = next;
                self.order = None;
                self.revision += 1;
                Transition {
                    risk_changed: true,
                    resync: false,
                }
            }
            LifecycleEvent::Order(e) => {
                // A fill opens the position without a following position event;
                // the entry/TP/SL come from the state endpoint on resync.
                let filled = e.status == Some(OrderStatus::Filled);
                let next = match e.status {
                    Some(OrderStatus::Cancelled | OrderStatus::Filled) => None,
                    _ => Some(e.to_order()),
                };
                let risk_changed = next != self.order;
                if !risk_changed && !filled {
                    return Transition::default();
                }
                debug!(selection = %selection, order_id = %e.order_id, status = ?e.status, "Order event");
                if risk_changed {
                    self.order = next;
                    self.revision += 1;
                }
                Transition {
                    risk_changed,
                    resync: filled,
                }
            }
            LifecycleEvent::TradeClosed(e) => {
                info!(
                    selection = %selection,
                    trigger = e.trigger_type.as_deref().unwrap_or("?"),
                    pnl = e.pnl.unwrap_or(0.0),
                    "Trade closed"
                );
                Transition {
                    risk_changed: false,
                    resync: true,
                }
            }
        }
    }
}
