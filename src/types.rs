//! Core types used throughout StratView
//!
//! Defines the view data model: candles, indicator schema, positions,
//! pending orders, closed trades and the selection they belong to.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Epoch values above this are treated as milliseconds
const MILLIS_THRESHOLD: f64 = 100_000_000_000.0;

/// Normalize an epoch timestamp (seconds or milliseconds, possibly fractional) to whole seconds
pub fn normalize_epoch_secs(ts: f64) -> i64 {
    if ts.abs() >= MILLIS_THRESHOLD {
        (ts / 1000.0).floor() as i64
    } else {
        ts.floor() as i64
    }
}

/// Parse a timestamp from a JSON value: number, numeric string or RFC 3339 string
pub fn parse_time_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()).map(normalize_epoch_secs),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(v) = s.parse::<f64>() {
                return v.is_finite().then(|| normalize_epoch_secs(v));
            }
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp());
            }
            // SQLite-style "YYYY-MM-DD HH:MM:SS[.ffffff]" without offset, assumed UTC
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
                .ok()
                .map(|dt| dt.and_utc().timestamp())
        }
        _ => None,
    }
}

fn de_epoch_secs<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(d)?;
    parse_time_value(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {value}")))
}

fn de_opt_epoch_secs<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    let value = Option::<Value>::deserialize(d)?;
    Ok(value.as_ref().and_then(parse_time_value))
}

fn de_indicator_map<'de, D: Deserializer<'de>>(d: D) -> Result<HashMap<String, f64>, D::Error> {
    let raw = Option::<HashMap<String, Option<f64>>>::deserialize(d)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|(k, v)| v.filter(|x| x.is_finite()).map(|x| (k, x)))
        .collect())
}

/// Accepts either a JSON value or a string holding JSON (metadata hashes store lists as strings)
pub(crate) fn de_lenient_json<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned + Default,
{
    let value = Option::<Value>::deserialize(d)?.unwrap_or(Value::Null);
    let value = match value {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    };
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value).map_err(serde::de::Error::custom)
}

// ─────────────────────────────────────────────────────────────────
// Selection
// ─────────────────────────────────────────────────────────────────

/// The (strategy, instrument) pair currently being viewed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub strategy_id: String,
    pub symbol: String,
}

impl Selection {
    pub fn new(strategy_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            symbol: symbol.into(),
        }
    }

    /// True when an event tagged with this strategy and symbol belongs to the selection
    pub fn matches(&self, strategy_id: &str, symbol: &str) -> bool {
        self.strategy_id == strategy_id && self.symbol == symbol
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.strategy_id, self.symbol)
    }
}

// ─────────────────────────────────────────────────────────────────
// Candles
// ─────────────────────────────────────────────────────────────────

/// OHLCV candle with per-candle indicator values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time in epoch seconds
    #[serde(alias = "timestamp", deserialize_with = "de_epoch_secs")]
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
    /// Nested indicator mapping (indicator id -> value)
    #[serde(default, deserialize_with = "de_indicator_map")]
    pub indicators: HashMap<String, f64>,
    /// Any other flat field of the record; older schemas put indicator values here
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl Candle {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume: None,
            indicators: HashMap::new(),
            extra: HashMap::new(),
        }
    }

    pub fn with_indicator(mut self, id: &str, value: f64) -> Self {
        self.indicators.insert(id.to_string(), value);
        self
    }

    /// Close above open
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Look up an indicator value, checking the nested mapping first and
    /// then flat candle fields. Non-finite values read as absent.
    pub fn indicator(&self, id: &str) -> Option<f64> {
        let value = self.indicators.get(id).copied().or_else(|| match id {
            "open" => Some(self.open),
            "high" => Some(self.high),
            "low" => Some(self.low),
            "close" => Some(self.close),
            "volume" => self.volume,
            _ => self.extra.get(id).and_then(Value::as_f64),
        });
        value.filter(|v| v.is_finite())
    }
}

// ─────────────────────────────────────────────────────────────────
// Indicator schema
// ─────────────────────────────────────────────────────────────────

/// How an indicator is displayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayKind {
    Line,
    Histogram,
    /// Fixed-value reference line, not a chart series
    HorizontalLine,
}

/// Line dash style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LineStyle {
    #[default]
    Solid,
    Dotted,
    Dashed,
    LargeDashed,
    SparseDotted,
}

impl LineStyle {
    /// Map a declared style (name or chart-library numeric code) to a line style
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::String(s)) => match s.to_lowercase().replace(['-', ' '], "_").as_str() {
                "dotted" | "dot" => LineStyle::Dotted,
                "dashed" | "dash" => LineStyle::Dashed,
                "large_dashed" | "largedashed" => LineStyle::LargeDashed,
                "sparse_dotted" | "sparsedotted" => LineStyle::SparseDotted,
                _ => LineStyle::Solid,
            },
            Some(Value::Number(n)) => match n.as_u64() {
                Some(1) => LineStyle::Dotted,
                Some(2) => LineStyle::Dashed,
                Some(3) => LineStyle::LargeDashed,
                Some(4) => LineStyle::SparseDotted,
                _ => LineStyle::Solid,
            },
            _ => LineStyle::Solid,
        }
    }
}

/// Display declaration for one indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSpec {
    pub id: String,
    pub pane: String,
    pub kind: DisplayKind,
    pub color: Option<String>,
    pub style: LineStyle,
    pub line_width: Option<u32>,
    /// Fixed value for horizontal reference lines
    pub value: Option<f64>,
}

impl IndicatorSpec {
    /// Build from the raw per-indicator config object. Returns None when the entry is not an object.
    pub fn from_config(pane: &str, id: &str, config: &Value) -> Option<Self> {
        let obj = config.as_object()?;
        let value = obj.get("value").and_then(Value::as_f64).filter(|v| v.is_finite());
        let declared = obj
            .get("type")
            .or_else(|| obj.get("kind"))
            .and_then(Value::as_str)
            .unwrap_or("line")
            .to_lowercase();
        let kind = if value.is_some() {
            DisplayKind::HorizontalLine
        } else if declared == "histogram" {
            DisplayKind::Histogram
        } else {
            DisplayKind::Line
        };
        Some(Self {
            id: id.to_string(),
            pane: pane.to_string(),
            kind,
            color: obj.get("color").and_then(Value::as_str).map(str::to_string),
            style: LineStyle::from_value(obj.get("style").or_else(|| obj.get("lineStyle"))),
            line_width: obj
                .get("lineWidth")
                .or_else(|| obj.get("line_width"))
                .and_then(Value::as_u64)
                .map(|w| w as u32),
            value,
        })
    }
}

/// One declared pane and its indicators, in declaration order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PaneSchema {
    pub name: String,
    pub indicators: Vec<IndicatorSpec>,
}

/// Strategy-declared indicator schema: pane name -> indicator id -> display config
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IndicatorSchema {
    pub panes: Vec<PaneSchema>,
}

impl IndicatorSchema {
    /// Parse the ordered pane mapping. Non-object panes and entries are skipped.
    pub fn from_value(value: &Value) -> Self {
        let Some(panes) = value.as_object() else {
            return Self::default();
        };
        let panes = panes
            .iter()
            .filter_map(|(pane, indicators)| {
                let indicators = indicators.as_object()?;
                let indicators = indicators
                    .iter()
                    .filter_map(|(id, cfg)| IndicatorSpec::from_config(pane, id, cfg))
                    .collect();
                Some(PaneSchema {
                    name: pane.clone(),
                    indicators,
                })
            })
            .collect();
        Self { panes }
    }

    pub fn is_empty(&self) -> bool {
        self.panes.is_empty()
    }

    /// All indicators in declaration order
    pub fn indicators(&self) -> impl Iterator<Item = &IndicatorSpec> {
        self.panes.iter().flat_map(|p| p.indicators.iter())
    }
}

// ─────────────────────────────────────────────────────────────────
// Positions, orders, trades
// ─────────────────────────────────────────────────────────────────

/// Position side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    #[serde(alias = "BUY", alias = "long", alias = "Long")]
    Long,
    #[serde(alias = "SELL", alias = "short", alias = "Short")]
    Short,
    #[serde(alias = "flat", alias = "Flat")]
    Flat,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
            Side::Flat => write!(f, "FLAT"),
        }
    }
}

/// Open position. FLAT is represented by the absence of a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub symbol: String,
    pub side: Side,
    #[serde(default)]
    pub entry_price: f64,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default, alias = "unrealised_pnl")]
    pub unrealized_pnl: f64,
    #[serde(default)]
    pub size: Option<f64>,
}

/// Pending entry order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(default = "default_order_type", alias = "type")]
    pub order_type: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default, alias = "action")]
    pub side: Option<String>,
}

fn default_order_type() -> String {
    "LIMIT".to_string()
}

/// Position and pending order for one (strategy, symbol)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstrumentState {
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub order: Option<Order>,
}

/// Closed trade from the trade history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    #[serde(deserialize_with = "de_epoch_secs")]
    pub entry_time: i64,
    #[serde(default, deserialize_with = "de_opt_epoch_secs")]
    pub exit_time: Option<i64>,
    pub side: Side,
    #[serde(default)]
    pub pnl: Option<f64>,
    #[serde(default)]
    pub entry_price: Option<f64>,
    #[serde(default)]
    pub exit_price: Option<f64>,
}

/// Strategy metadata as published by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyMeta {
    pub strategy_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_json")]
    pub symbols: Vec<String>,
    #[serde(default, deserialize_with = "de_lenient_json")]
    pub timeframes: Vec<String>,
    #[serde(default, deserialize_with = "de_lenient_json")]
    pub indicators_config: Value,
}

/// Parse a resolution string ("5", "15m", "1h", "D") to seconds
pub fn resolution_secs(resolution: &str) -> i64 {
    let r = resolution.trim().to_lowercase();
    if let Ok(mins) = r.parse::<i64>() {
        return mins.max(1) * 60;
    }
    let (num, unit) = r.split_at(r.find(|c: char| !c.is_ascii_digit()).unwrap_or(r.len()));
    let n = num.parse::<i64>().unwrap_or(1).max(1);
    match unit {
        "s" => n,
        "m" | "min" => n * 60,
        "h" => n * 3600,
        "d" => n * 86_400,
        "w" => n * 604_800,
        _ => 300,
    }
}
