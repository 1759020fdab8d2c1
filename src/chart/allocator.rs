//! Pane/Series Allocator
//!
//! Turns an indicator schema into chart series. Pane 0 is the price pane and
//! always carries the candle series; every following pane gets the next
//! index. Fixed-value entries are reference lines, not series.

use tracing::debug;

use crate::render::{Palette, RenderPort, SeriesHandle, SeriesKind, SeriesOptions};
use crate::types::{DisplayKind, IndicatorSchema, IndicatorSpec};

/// Headroom kept above histogram bars so they stay under the price action
pub const HISTOGRAM_TOP_MARGIN: f64 = 0.7;

/// One indicator bound to a series
#[derive(Debug, Clone, PartialEq)]
pub struct AllocatedSeries {
    pub spec: IndicatorSpec,
    pub pane: usize,
    pub handle: SeriesHandle,
}

/// Fixed-value line waiting to be drawn on its pane
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSpec {
    pub spec: IndicatorSpec,
    pub pane: usize,
}

/// Every handle owned by the current snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaneAssignment {
    pub candles: Option<SeriesHandle>,
    pub series: Vec<AllocatedSeries>,
    pub references: Vec<ReferenceSpec>,
    pub pane_count: usize,
}

impl PaneAssignment {
    /// Series that annotations in `pane` attach to
    pub fn primary_series(&self, pane: usize) -> Option<SeriesHandle> {
        if pane == 0 {
            if let Some(candles) = self.candles {
                return Some(candles);
            }
        }
        self.series.iter().find(|s| s.pane == pane).map(|s| s.handle)
    }

    pub fn handle_count(&self) -> usize {
        self.series.len() + usize::from(self.candles.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.handle_count() == 0
    }
}

fn series_options(spec: &IndicatorSpec, pane: usize, palette: &Palette) -> SeriesOptions {
    let histogram = spec.kind == DisplayKind::Histogram;
    SeriesOptions {
        kind: if histogram {
            SeriesKind::Histogram
        } else {
            SeriesKind::Line
        },
        pane,
        title: spec.id.clone(),
        color: Some(spec.color.clone().unwrap_or_else(|| palette.line.clone())),
        line_style: spec.style,
        line_width: spec.line_width.unwrap_or(if pane == 0 { 1 } else { 2 }),
        price_scale_id: histogram.then(|| spec.id.clone()),
        top_margin: if histogram { HISTOGRAM_TOP_MARGIN } else { 0.0 },
    }
}

/// Allocate the candle series and one series per non-fixed indicator.
///
/// The caller must have released the previous assignment first.
pub fn allocate<R: RenderPort + ?Sized>(
    render: &mut R,
    schema: &IndicatorSchema,
    palette: &Palette,
) -> PaneAssignment {
    let mut assignment = PaneAssignment {
        candles: Some(render.add_series(SeriesOptions::candlestick())),
        pane_count: schema.panes.len().max(1),
        ..PaneAssignment::default()
    };

    for (pane, pane_schema) in schema.panes.iter().enumerate() {
        for spec in &pane_schema.indicators {
            if spec.kind == DisplayKind::HorizontalLine {
                assignment.references.push(ReferenceSpec {
                    spec: spec.clone(),
                    pane,
                });
                continue;
            }
            let handle = render.add_series(series_options(spec, pane, palette));
            assignment.series.push(AllocatedSeries {
                spec: spec.clone(),
                pane,
                handle,
            });
        }
    }

    debug!(
        panes = assignment.pane_count,
        series = assignment.handle_count(),
        references = assignment.references.len(),
        "Series allocated"
    );
    assignment
}

/// Release every series in the assignment, leaving it empty
pub fn release<R: RenderPort + ?Sized>(render: &mut R, assignment: &mut PaneAssignment) {
    let released = assignment.handle_count();
    if let Some(candles) = assignment.candles.take() {
        render.remove_series(candles);
    }
    for series in assignment.series.drain(..) {
        render.remove_series(series.handle);
    }
    assignment.references.clear();
    assignment.pane_count = 0;
    if released > 0 {
        debug!(released, "Series released");
    }
}
