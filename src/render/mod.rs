//! Rendering port
//!
//! Every chart mutation goes through [`RenderPort`], so the synchronization
//! logic never touches a concrete chart widget. [`SceneRecorder`] is the
//! in-memory surface used by tests and by the headless binary.

mod scene;

pub use scene::{RecordedSeries, SceneRecorder};

use serde::{Deserialize, Serialize};

use crate::types::{Candle, LineStyle};

/// Handle to a series owned by the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesHandle(pub u64);

/// Handle to a price line attached to a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PriceLineHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesKind {
    Candlestick,
    Line,
    Histogram,
}

/// Options for a new series
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesOptions {
    pub kind: SeriesKind,
    pub pane: usize,
    pub title: String,
    pub color: Option<String>,
    pub line_style: LineStyle,
    pub line_width: u32,
    /// Dedicated price scale; None shares the pane's default scale
    pub price_scale_id: Option<String>,
    /// Fraction of the pane height kept empty above the series
    pub top_margin: f64,
}

impl SeriesOptions {
    pub fn candlestick() -> Self {
        Self {
            kind: SeriesKind::Candlestick,
            pane: 0,
            title: String::new(),
            color: None,
            line_style: LineStyle::Solid,
            line_width: 1,
            price_scale_id: None,
            top_margin: 0.0,
        }
    }
}

/// Single-value point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub time: i64,
    pub value: f64,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceLineOptions {
    pub price: f64,
    pub color: String,
    pub style: LineStyle,
    pub line_width: u32,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MarkerPosition {
    AboveBar,
    BelowBar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MarkerShape {
    ArrowUp,
    ArrowDown,
    Circle,
}

/// Point marker drawn on a series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub time: i64,
    pub position: MarkerPosition,
    pub shape: MarkerShape,
    pub color: String,
    pub text: String,
}

/// Price axis format
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceFormat {
    pub precision: u32,
    pub min_move: f64,
}

impl PriceFormat {
    pub fn with_precision(precision: u32) -> Self {
        Self {
            precision,
            min_move: 10f64.powi(-(precision as i32)),
        }
    }
}

/// Colors used by the chart pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Palette {
    pub bullish: String,
    pub bearish: String,
    pub profit: String,
    pub loss: String,
    pub entry: String,
    pub order: String,
    pub reference: String,
    pub line: String,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            bullish: "#26a69a".to_string(),
            bearish: "#ef5350".to_string(),
            profit: "#26a69a".to_string(),
            loss: "#ef5350".to_string(),
            entry: "#2196f3".to_string(),
            order: "#ffb300".to_string(),
            reference: "#787b86".to_string(),
            line: "#2962ff".to_string(),
        }
    }
}

/// Capability set of the chart widget
pub trait RenderPort {
    /// Allocate a new series
    fn add_series(&mut self, options: SeriesOptions) -> SeriesHandle;

    /// Release a series together with its data, price lines and markers
    fn remove_series(&mut self, series: SeriesHandle);

    /// Replace the candle data of a candlestick series
    fn set_candles(&mut self, series: SeriesHandle, candles: &[Candle]);

    /// Update the last bar in place, or append when newer
    fn update_candle(&mut self, series: SeriesHandle, candle: &Candle);

    /// Replace the data of a line or histogram series
    fn set_points(&mut self, series: SeriesHandle, points: Vec<SeriesPoint>);

    /// Update the last point in place, or append when newer
    fn update_point(&mut self, series: SeriesHandle, point: SeriesPoint);

    fn create_price_line(&mut self, series: SeriesHandle, options: PriceLineOptions)
        -> PriceLineHandle;

    fn remove_price_line(&mut self, series: SeriesHandle, line: PriceLineHandle);

    /// Replace all markers of a series. Markers must be time-ordered.
    fn set_markers(&mut self, series: SeriesHandle, markers: Vec<Marker>);

    fn set_price_format(&mut self, format: PriceFormat);

    /// Fit the visible time range to the loaded data
    fn fit_content(&mut self);

    /// One-line description for diagnostics
    fn summary(&self) -> String {
        String::new()
    }
}
