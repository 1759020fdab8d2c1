//! Indicator Data Binder
//!
//! Projects candles onto the allocated series. Missing or non-finite values
//! are dropped so partial coverage (warm-up periods) never reaches the
//! surface.

use super::allocator::{AllocatedSeries, PaneAssignment};
use crate::render::{Palette, RenderPort, SeriesPoint};
use crate::types::{Candle, DisplayKind};

/// Bar color for a candle's direction
pub fn direction_color<'a>(candle: &Candle, palette: &'a Palette) -> &'a str {
    if candle.is_bullish() {
        &palette.bullish
    } else {
        &palette.bearish
    }
}

/// Point for one candle, or None when the candle carries no usable value
pub fn point_for(candle: &Candle, series: &AllocatedSeries, palette: &Palette) -> Option<SeriesPoint> {
    let value = candle.indicator(&series.spec.id)?;
    let color = (series.spec.kind == DisplayKind::Histogram)
        .then(|| direction_color(candle, palette).to_string());
    Some(SeriesPoint {
        time: candle.time,
        value,
        color,
    })
}

/// Project a candle list onto one series
pub fn project(candles: &[Candle], series: &AllocatedSeries, palette: &Palette) -> Vec<SeriesPoint> {
    candles
        .iter()
        .filter_map(|c| point_for(c, series, palette))
        .collect()
}

/// Bulk-load candles and every indicator series. `fit` resets the visible
/// range to the data; resyncs pass false to keep the user's zoom.
pub fn bind<R: RenderPort + ?Sized>(
    render: &mut R,
    assignment: &PaneAssignment,
    candles: &[Candle],
    palette: &Palette,
    fit: bool,
) {
    if let Some(handle) = assignment.candles {
        render.set_candles(handle, candles);
    }
    for series in &assignment.series {
        render.set_points(series.handle, project(candles, series, palette));
    }
    if fit {
        render.fit_content();
    }
}

/// Apply one incremental candle in place. Series the candle has no value
/// for are left untouched. Returns the number of series updated.
pub fn apply_update<R: RenderPort + ?Sized>(
    render: &mut R,
    assignment: &PaneAssignment,
    candle: &Candle,
    palette: &Palette,
) -> usize {
    let mut touched = 0;
    if let Some(handle) = assignment.candles {
        render.update_candle(handle, candle);
        touched += 1;
    }
    for series in &assignment.series {
        if let Some(point) = point_for(candle, series, palette) {
            render.update_point(series.handle, point);
            touched += 1;
        }
    }
    touched
}
