//! Annotation Manager
//!
//! Reference lines from fixed-value indicators, the risk picture of the
//! open position (or pending order), and the trade marker timeline.

use tracing::debug;

use super::allocator::PaneAssignment;
use crate::render::{
    Marker, MarkerPosition, MarkerShape, Palette, PriceLineHandle, PriceLineOptions, RenderPort,
    SeriesHandle,
};
use crate::types::{LineStyle, Order, Position, Side, TradeRecord};

/// Draw every fixed-value line on its pane's primary series. Lines live as
/// long as the series they are attached to. Returns the number drawn.
pub fn draw_reference_lines<R: RenderPort + ?Sized>(
    render: &mut R,
    assignment: &PaneAssignment,
    palette: &Palette,
) -> usize {
    let mut drawn = 0;
    for reference in &assignment.references {
        let (Some(series), Some(price)) =
            (assignment.primary_series(reference.pane), reference.spec.value)
        else {
            debug!(id = %reference.spec.id, pane = reference.pane, "Reference line has no series to attach to");
            continue;
        };
        let style = match reference.spec.style {
            LineStyle::Solid => LineStyle::Dashed,
            other => other,
        };
        render.create_price_line(
            series,
            PriceLineOptions {
                price,
                color: reference
                    .spec
                    .color
                    .clone()
                    .unwrap_or_else(|| palette.reference.clone()),
                style,
                line_width: reference.spec.line_width.unwrap_or(1),
                title: reference.spec.id.clone(),
            },
        );
        drawn += 1;
    }
    drawn
}

// ─────────────────────────────────────────────────────────────────
// Risk lines
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLineKind {
    Entry,
    TakeProfit,
    StopLoss,
    PendingOrder,
}

/// Price lines describing the current position or pending order.
/// Always cleared and rebuilt as a whole.
#[derive(Debug, Default)]
pub struct RiskLines {
    series: Option<SeriesHandle>,
    lines: Vec<(RiskLineKind, PriceLineHandle)>,
}

impl RiskLines {
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn kinds(&self) -> Vec<RiskLineKind> {
        self.lines.iter().map(|(k, _)| *k).collect()
    }

    /// Remove every line. Returns how many were removed.
    pub fn clear<R: RenderPort + ?Sized>(&mut self, render: &mut R) -> usize {
        let removed = self.lines.len();
        if let Some(series) = self.series.take() {
            for (_, line) in self.lines.drain(..) {
                render.remove_price_line(series, line);
            }
        }
        self.lines.clear();
        removed
    }

    /// Drop the handles without touching the surface (their series is gone)
    pub fn forget(&mut self) {
        self.series = None;
        self.lines.clear();
    }

    /// Replace the lines with the ones for `position`, or for `order` when flat
    pub fn rebuild<R: RenderPort + ?Sized>(
        &mut self,
        render: &mut R,
        series: SeriesHandle,
        position: Option<&Position>,
        order: Option<&Order>,
        palette: &Palette,
    ) -> usize {
        self.clear(render);
        self.series = Some(series);

        let mut wanted: Vec<(RiskLineKind, PriceLineOptions)> = Vec::with_capacity(3);
        match position {
            Some(p) if p.side != Side::Flat => {
                if p.entry_price.is_finite() && p.entry_price > 0.0 {
                    wanted.push((
                        RiskLineKind::Entry,
                        line(p.entry_price, &palette.entry, LineStyle::Dotted, format!("{} ENTRY", p.side)),
                    ));
                }
                if let Some(tp) = p.take_profit.filter(|v| v.is_finite()) {
                    wanted.push((RiskLineKind::TakeProfit, line(tp, &palette.profit, LineStyle::Dashed, "TP".into())));
                }
                if let Some(sl) = p.stop_loss.filter(|v| v.is_finite()) {
                    wanted.push((RiskLineKind::StopLoss, line(sl, &palette.loss, LineStyle::Dashed, "SL".into())));
                }
            }
            _ => {
                if let Some((o, price)) = order.and_then(|o| o.price.filter(|v| v.is_finite()).map(|p| (o, p))) {
                    wanted.push((
                        RiskLineKind::PendingOrder,
                        line(price, &palette.order, LineStyle::Dashed, format!("{} ORDER", o.order_type)),
                    ));
                }
            }
        }

        for (kind, options) in wanted {
            let handle = render.create_price_line(series, options);
            self.lines.push((kind, handle));
        }
        self.lines.len()
    }
}

fn line(price: f64, color: &str, style: LineStyle, title: String) -> PriceLineOptions {
    PriceLineOptions {
        price,
        color: color.to_string(),
        style,
        line_width: 1,
        title,
    }
}

// ─────────────────────────────────────────────────────────────────
// Trade markers
// ─────────────────────────────────────────────────────────────────

/// Expand trades into entry and exit markers, sorted by time.
///
/// The cap applies per trade so an entry and its exit are kept or dropped
/// together: only the `max_markers / 2` most recently entered trades are
/// expanded (at least one; 0 keeps all).
pub fn trade_markers(trades: &[TradeRecord], palette: &Palette, max_markers: usize) -> Vec<Marker> {
    let mut kept: Vec<&TradeRecord> = trades.iter().filter(|t| t.side != Side::Flat).collect();
    kept.sort_by_key(|t| t.entry_time);
    if max_markers > 0 {
        let max_trades = (max_markers / 2).max(1);
        if kept.len() > max_trades {
            kept.drain(..kept.len() - max_trades);
        }
    }

    let mut markers = Vec::with_capacity(kept.len() * 2);
    for trade in kept {
        let (position, shape, color) = match trade.side {
            Side::Long => (MarkerPosition::BelowBar, MarkerShape::ArrowUp, &palette.bullish),
            Side::Short => (MarkerPosition::AboveBar, MarkerShape::ArrowDown, &palette.bearish),
            Side::Flat => continue,
        };
        markers.push(Marker {
            time: trade.entry_time,
            position,
            shape,
            color: color.clone(),
            text: trade.side.to_string(),
        });

        let Some(exit_time) = trade.exit_time else {
            continue;
        };
        let (position, shape) = match trade.side {
            Side::Long => (MarkerPosition::AboveBar, MarkerShape::ArrowDown),
            _ => (MarkerPosition::BelowBar, MarkerShape::ArrowUp),
        };
        let pnl = trade.pnl.filter(|v| v.is_finite());
        let color = match pnl {
            Some(v) if v < 0.0 => &palette.loss,
            _ => &palette.profit,
        };
        markers.push(Marker {
            time: exit_time,
            position,
            shape,
            color: color.clone(),
            text: match pnl {
                Some(v) => format!("EXIT {v:+.2}"),
                None => "EXIT".to_string(),
            },
        });
    }

    // Stable: an exit at the same second as the next entry stays first
    markers.sort_by_key(|m| m.time);
    markers
}
