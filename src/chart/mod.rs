//! Chart pipeline
//!
//! Owns every rendering handle of the active selection: allocation, bulk
//! binding, annotations and incremental updates all go through
//! [`ChartView`], which is torn down as a whole on reselection.

pub mod allocator;
pub mod annotations;
pub mod binder;

use tracing::debug;

use crate::render::{Palette, PriceFormat, RenderPort};
use crate::snapshot::Snapshot;
use crate::types::{Candle, Order, Position, Selection, TradeRecord};
use allocator::PaneAssignment;
use annotations::{RiskLineKind, RiskLines};

/// What happened to an incremental candle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleApplied {
    /// Same time as the last bar, updated in place
    Updated,
    /// Newer than the last bar
    Appended,
    /// Older than the last bar
    Stale,
    /// No chart is built
    NotBuilt,
}

pub struct ChartView {
    palette: Palette,
    max_markers: usize,
    selection: Option<Selection>,
    assignment: PaneAssignment,
    risk: RiskLines,
    last_bar: Option<i64>,
    precision: u32,
    synthetic: bool,
    marker_count: usize,
}

impl ChartView {
    pub fn new(palette: Palette, max_markers: usize) -> Self {
        Self {
            palette,
            max_markers,
            selection: None,
            assignment: PaneAssignment::default(),
            risk: RiskLines::default(),
            last_bar: None,
            precision: 2,
            synthetic: false,
            marker_count: 0,
        }
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn is_built(&self) -> bool {
        self.assignment.candles.is_some()
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn assignment(&self) -> &PaneAssignment {
        &self.assignment
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    pub fn risk_line_count(&self) -> usize {
        self.risk.len()
    }

    /// Kinds of the risk lines currently drawn
    pub fn risk_kinds(&self) -> Vec<RiskLineKind> {
        self.risk.kinds()
    }

    pub fn marker_count(&self) -> usize {
        self.marker_count
    }

    /// Rebuild the whole view from a snapshot. The previous assignment is
    /// released first. `fit` resets the visible range.
    pub fn build<R: RenderPort + ?Sized>(&mut self, render: &mut R, snapshot: &Snapshot, fit: bool) {
        self.teardown(render);

        self.assignment = allocator::allocate(render, &snapshot.schema, &self.palette);
        binder::bind(render, &self.assignment, &snapshot.candles, &self.palette, fit);
        let references = annotations::draw_reference_lines(render, &self.assignment, &self.palette);
        render.set_price_format(PriceFormat::with_precision(snapshot.precision));

        self.selection = Some(snapshot.selection.clone());
        self.last_bar = snapshot.candles.last().map(|c| c.time);
        self.precision = snapshot.precision;
        self.synthetic = snapshot.synthetic;

        debug!(
            selection = %snapshot.selection,
            series = self.assignment.handle_count(),
            references,
            fit,
            "Chart built"
        );
    }

    /// Release every handle owned by the view
    pub fn teardown<R: RenderPort + ?Sized>(&mut self, render: &mut R) {
        // Price lines go away with their series
        self.risk.forget();
        allocator::release(render, &mut self.assignment);
        self.selection = None;
        self.last_bar = None;
        self.marker_count = 0;
    }

    pub fn apply_candle<R: RenderPort + ?Sized>(&mut self, render: &mut R, candle: &Candle) -> CandleApplied {
        if !self.is_built() {
            return CandleApplied::NotBuilt;
        }
        let outcome = match self.last_bar {
            Some(last) if candle.time < last => return CandleApplied::Stale,
            Some(last) if candle.time == last => CandleApplied::Updated,
            _ => CandleApplied::Appended,
        };
        binder::apply_update(render, &self.assignment, candle, &self.palette);
        self.last_bar = Some(candle.time);
        outcome
    }

    /// Replace the trade marker timeline
    pub fn set_trades<R: RenderPort + ?Sized>(&mut self, render: &mut R, trades: &[TradeRecord]) -> usize {
        let Some(series) = self.assignment.candles else {
            return 0;
        };
        let markers = annotations::trade_markers(trades, &self.palette, self.max_markers);
        self.marker_count = markers.len();
        render.set_markers(series, markers);
        self.marker_count
    }

    /// Clear and redraw the risk lines for the given lifecycle state
    pub fn sync_risk<R: RenderPort + ?Sized>(
        &mut self,
        render: &mut R,
        position: Option<&Position>,
        order: Option<&Order>,
    ) -> usize {
        let Some(series) = self.assignment.candles else {
            return 0;
        };
        self.risk.rebuild(render, series, position, order, &self.palette)
    }
}
