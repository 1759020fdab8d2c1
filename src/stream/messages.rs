//! Push-stream wire format
//!
//! Inbound frames are `{type, ...payload}` envelopes. Unknown types decode to
//! [`PushMessage::Unknown`]; frames that fail to decode are dropped by the
//! caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::lifecycle::{
    LifecycleEvent, OrderExecutionEvent, PositionStateEvent, TradeTerminalEvent,
};
use crate::types::{parse_time_value, Candle};

/// Inbound push message
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// Lightweight last-price tick for the watchlist
    WatchlistPing {
        symbol: String,
        price: f64,
        #[serde(default)]
        timestamp: Option<Value>,
    },
    /// Exchange-emulator event; `event` names the payload class
    Update {
        event: String,
        #[serde(default)]
        data: Value,
    },
    /// Full incremental candle
    CandleUpdate {
        #[serde(default)]
        strategy_id: Option<String>,
        symbol: String,
        data: Candle,
    },
    #[serde(other)]
    Unknown,
}

impl PushMessage {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PushMessage::WatchlistPing { .. } => "watchlist_ping",
            PushMessage::Update { .. } => "update",
            PushMessage::CandleUpdate { .. } => "candle_update",
            PushMessage::Unknown => "unknown",
        }
    }

    /// Ping time in epoch seconds, when present
    pub fn ping_time(&self) -> Option<i64> {
        match self {
            PushMessage::WatchlistPing {
                timestamp: Some(ts),
                ..
            } => parse_time_value(ts),
            _ => None,
        }
    }
}

/// Decode the payload of an `update` message. `Ok(None)` for event names
/// this client does not know.
pub fn decode_update(event: &str, data: &Value) -> Result<Option<LifecycleEvent>, serde_json::Error> {
    let decoded = match event {
        "PositionStateEvent" => {
            LifecycleEvent::Position(PositionStateEvent::deserialize(data)?)
        }
        "OrderExecutionEvent" => {
            LifecycleEvent::Order(OrderExecutionEvent::deserialize(data)?)
        }
        "TradeTerminalEvent" => {
            LifecycleEvent::TradeClosed(TradeTerminalEvent::deserialize(data)?)
        }
        _ => return Ok(None),
    };
    Ok(Some(decoded))
}

/// Outbound control frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Narrow server-side push scope to one symbol; None widens it again
    SelectSymbol { symbol: Option<String> },
}

impl ControlMessage {
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
