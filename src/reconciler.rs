//! Live Update Reconciler
//!
//! Applies push messages onto the already-built view without reloading.
//! Candle updates go to the chart in place, ticks go to the watchlist only,
//! and lifecycle events go to the tracker. Anything that cannot be applied
//! safely is reported back as a resync request.

use tracing::debug;

use crate::chart::{CandleApplied, ChartView};
use crate::lifecycle::LifecycleTracker;
use crate::render::RenderPort;
use crate::stream::{decode_update, PushMessage};
use crate::types::Selection;
use crate::watchlist::Watchlist;

/// Effect of one message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciled {
    pub chart_changed: bool,
    pub watchlist_changed: bool,
    /// A delayed full resync was requested
    pub resync: bool,
}

/// Derived state of the active selection
pub struct ViewState {
    pub chart: ChartView,
    pub tracker: LifecycleTracker,
    pub watchlist: Watchlist,
}

impl ViewState {
    pub fn new(chart: ChartView) -> Self {
        Self {
            chart,
            tracker: LifecycleTracker::new(),
            watchlist: Watchlist::new(),
        }
    }

    /// Redraw risk lines from the tracker
    pub fn sync_risk<R: RenderPort + ?Sized>(&mut self, render: &mut R) -> usize {
        self.chart
            .sync_risk(render, self.tracker.position(), self.tracker.order())
    }

    pub fn reconcile<R: RenderPort + ?Sized>(
        &mut self,
        render: &mut R,
        selection: Option<&Selection>,
        message: PushMessage,
    ) -> Reconciled {
        let mut out = Reconciled::default();
        match message {
            PushMessage::WatchlistPing { ref symbol, price, .. } => {
                out.watchlist_changed = self.watchlist.patch_price(symbol, price, message.ping_time());
            }

            PushMessage::CandleUpdate {
                strategy_id,
                symbol,
                data,
            } => {
                let Some(sel) = selection else {
                    return out;
                };
                let strategy_ok = strategy_id.as_deref().map_or(true, |s| s == sel.strategy_id);
                if !strategy_ok || symbol != sel.symbol || self.chart.selection() != Some(sel) {
                    debug!(symbol = %symbol, "Candle update for another selection ignored");
                    return out;
                }
                match self.chart.apply_candle(render, &data) {
                    CandleApplied::Updated | CandleApplied::Appended => out.chart_changed = true,
                    CandleApplied::Stale => {
                        debug!(selection = %sel, time = data.time, "Out-of-order candle dropped")
                    }
                    CandleApplied::NotBuilt => {}
                }
            }

            PushMessage::Update { event, data } => {
                let decoded = match decode_update(&event, &data) {
                    Ok(Some(decoded)) => decoded,
                    Ok(None) => {
                        debug!(event = %event, "Unhandled update event ignored");
                        return out;
                    }
                    Err(e) => {
                        debug!(event = %event, error = %e, "Malformed update payload dropped");
                        return out;
                    }
                };
                out.watchlist_changed = self.watchlist.apply_lifecycle(&decoded);

                let Some(sel) = selection else {
                    return out;
                };
                let transition = self.tracker.apply(sel, &decoded);
                if transition.risk_changed {
                    self.sync_risk(render);
                    out.chart_changed = true;
                }
                out.resync = transition.resync;
            }

            PushMessage::Unknown => {}
        }
        out
    }
}
