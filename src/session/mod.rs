//! Selection Controller and session context
//!
//! [`Session`] is a pure state machine: it consumes [`SessionEvent`]s and
//! returns [`Command`]s for the driver to execute. Every fetch carries a
//! [`FetchTicket`] stamped with the selection epoch; results for an older
//! epoch (or an older resync generation) are discarded. Stream events carry
//! the subscription id they were produced under, and the resync timer
//! carries the epoch it was scheduled in.

mod command;

pub use command::{Command, FetchReason, FetchTicket, SessionEvent};

use std::time::Duration;
use tracing::{debug, info};

use crate::chart::ChartView;
use crate::config::AppConfig;
use crate::reconciler::{Reconciled, ViewState};
use crate::render::{Palette, RenderPort};
use crate::stream::{PushMessage, StreamEvent, StreamEventKind};
use crate::types::{Selection, TradeRecord};

/// Session tunables
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub resync_delay: Duration,
    pub stream_enabled: bool,
    pub max_markers: usize,
    pub palette: Palette,
}

impl SessionConfig {
    pub fn from_app(cfg: &AppConfig) -> Self {
        Self {
            resync_delay: cfg.chart.resync_delay(),
            stream_enabled: cfg.stream.enabled,
            max_markers: cfg.chart.max_markers,
            palette: cfg.chart.palette.clone(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            resync_delay: Duration::from_millis(1500),
            stream_enabled: true,
            max_markers: 500,
            palette: Palette::default(),
        }
    }
}

/// Counters for diagnostics and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub stale_results: u64,
    pub stale_stream_events: u64,
    pub resyncs: u64,
    pub ignored_reselects: u64,
}

#[derive(Debug, Clone)]
struct Subscription {
    id: u64,
    strategy_id: String,
    connected_once: bool,
}

pub struct Session<R: RenderPort> {
    render: R,
    config: SessionConfig,
    view: ViewState,
    selection: Option<Selection>,
    epoch: u64,
    generation: u64,
    /// Visible range was fitted for the current epoch
    fitted: bool,
    /// Latest trade list for the current generation, re-applied after rebuilds
    trades: Option<Vec<TradeRecord>>,
    subscription: Option<Subscription>,
    next_subscription: u64,
    resync_pending: bool,
    stats: SessionStats,
}

impl<R: RenderPort> Session<R> {
    pub fn new(render: R, config: SessionConfig) -> Self {
        let chart = ChartView::new(config.palette.clone(), config.max_markers);
        Self {
            render,
            config,
            view: ViewState::new(chart),
            selection: None,
            epoch: 0,
            generation: 0,
            fitted: false,
            trades: None,
            subscription: None,
            next_subscription: 0,
            resync_pending: false,
            stats: SessionStats::default(),
        }
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn render(&self) -> &R {
        &self.render
    }

    /// Direct access to the surface (user zoom, inspection)
    pub fn render_mut(&mut self) -> &mut R {
        &mut self.render
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn resync_pending(&self) -> bool {
        self.resync_pending
    }

    /// Id of the open stream subscription
    pub fn subscription(&self) -> Option<u64> {
        self.subscription.as_ref().map(|s| s.id)
    }

    /// Commands to run once at startup
    pub fn bootstrap(&self) -> Vec<Command> {
        vec![Command::FetchInstruments]
    }

    pub fn handle(&mut self, event: SessionEvent) -> Vec<Command> {
        match event {
            SessionEvent::Select(selection) => self.select(selection),
            SessionEvent::Clear => self.clear(),
            SessionEvent::SnapshotLoaded { ticket, snapshot } => {
                if self.is_current(&ticket, "snapshot") {
                    let fit = !self.fitted;
                    self.view.chart.build(&mut self.render, &snapshot, fit);
                    self.fitted = true;
                    if let Some(trades) = &self.trades {
                        self.view.chart.set_trades(&mut self.render, trades);
                    }
                    self.view.sync_risk(&mut self.render);
                    info!(
                        selection = %ticket.selection,
                        epoch = ticket.epoch,
                        reason = ?ticket.reason,
                        candles = snapshot.candles.len(),
                        synthetic = snapshot.synthetic,
                        "View built"
                    );
                }
                Vec::new()
            }
            SessionEvent::TradesLoaded { ticket, trades } => {
                if self.is_current(&ticket, "trades") {
                    let markers = self.view.chart.set_trades(&mut self.render, &trades);
                    debug!(selection = %ticket.selection, trades = trades.len(), markers, "Trades applied");
                    self.trades = Some(trades);
                }
                Vec::new()
            }
            SessionEvent::StateLoaded { ticket, state } => {
                if self.is_current(&ticket, "state") {
                    if self.view.tracker.live_events() != ticket.live_mark {
                        debug!(selection = %ticket.selection, "Fetched state superseded by live events");
                    } else if self.view.tracker.seed(state) {
                        self.view.sync_risk(&mut self.render);
                    }
                }
                Vec::new()
            }
            SessionEvent::InstrumentsLoaded(instruments) => {
                debug!(count = instruments.len(), "Watchlist loaded");
                self.view.watchlist.load(instruments);
                Vec::new()
            }
            SessionEvent::Stream(event) => self.on_stream(event),
            SessionEvent::ResyncDue { epoch } => {
                if epoch != self.epoch || !self.resync_pending || self.selection.is_none() {
                    debug!(epoch, current = self.epoch, "Stale resync timer ignored");
                    return Vec::new();
                }
                self.resync_pending = false;
                self.resync()
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Selection
    // ─────────────────────────────────────────────────────────────

    fn select(&mut self, selection: Selection) -> Vec<Command> {
        if self.selection.as_ref() == Some(&selection) {
            self.stats.ignored_reselects += 1;
            debug!(selection = %selection, "Reselect of active pair ignored");
            return Vec::new();
        }

        let mut commands = self.reset_view();
        self.epoch += 1;
        info!(selection = %selection, epoch = self.epoch, "Selection changed");

        if self.config.stream_enabled {
            let keep = self
                .subscription
                .as_ref()
                .is_some_and(|s| s.strategy_id == selection.strategy_id);
            if !keep {
                if let Some(old) = self.subscription.take() {
                    commands.push(Command::CloseStream {
                        subscription: old.id,
                    });
                }
                self.next_subscription += 1;
                let id = self.next_subscription;
                self.subscription = Some(Subscription {
                    id,
                    strategy_id: selection.strategy_id.clone(),
                    connected_once: false,
                });
                commands.push(Command::OpenStream {
                    subscription: id,
                    strategy_id: selection.strategy_id.clone(),
                });
            }
            // Scope goes to the stream that is current after any switch
            commands.push(Command::SendControl {
                symbol: Some(selection.symbol.clone()),
            });
        }

        self.selection = Some(selection);
        commands.extend(self.fetch_all(FetchReason::Initial));
        commands
    }

    fn clear(&mut self) -> Vec<Command> {
        if self.selection.is_none() {
            return Vec::new();
        }
        let mut commands = self.reset_view();
        self.epoch += 1;
        self.selection = None;
        info!(epoch = self.epoch, "Selection cleared");

        if let Some(old) = self.subscription.take() {
            commands.push(Command::SendControl { symbol: None });
            commands.push(Command::CloseStream {
                subscription: old.id,
            });
        }
        commands
    }

    /// Tear down everything owned by the previous selection
    fn reset_view(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.resync_pending {
            self.resync_pending = false;
            commands.push(Command::CancelResync);
        }
        self.view.chart.teardown(&mut self.render);
        self.view.tracker.reset();
        self.trades = None;
        self.generation = 0;
        self.fitted = false;
        commands
    }

    // ─────────────────────────────────────────────────────────────
    // Fetches
    // ─────────────────────────────────────────────────────────────

    fn fetch_all(&mut self, reason: FetchReason) -> Vec<Command> {
        let Some(selection) = self.selection.clone() else {
            return Vec::new();
        };
        let ticket = FetchTicket {
            epoch: self.epoch,
            generation: self.generation,
            selection,
            reason,
            live_mark: self.view.tracker.live_events(),
        };
        vec![
            Command::FetchSnapshot(ticket.clone()),
            Command::FetchTrades(ticket.clone()),
            Command::FetchState(ticket),
        ]
    }

    fn resync(&mut self) -> Vec<Command> {
        self.generation += 1;
        self.stats.resyncs += 1;
        info!(
            selection = ?self.selection.as_ref().map(|s| s.to_string()),
            epoch = self.epoch,
            generation = self.generation,
            "Full resync"
        );
        self.fetch_all(FetchReason::Resync)
    }

    fn is_current(&mut self, ticket: &FetchTicket, what: &'static str) -> bool {
        let current = ticket.epoch == self.epoch
            && ticket.generation == self.generation
            && self.selection.as_ref() == Some(&ticket.selection);
        if !current {
            self.stats.stale_results += 1;
            debug!(
                what,
                selection = %ticket.selection,
                ticket_epoch = ticket.epoch,
                ticket_generation = ticket.generation,
                epoch = self.epoch,
                generation = self.generation,
                "Stale fetch result discarded"
            );
        }
        current
    }

    // ─────────────────────────────────────────────────────────────
    // Stream
    // ─────────────────────────────────────────────────────────────

    fn on_stream(&mut self, event: StreamEvent) -> Vec<Command> {
        let Some(sub) = self
            .subscription
            .as_mut()
            .filter(|s| s.id == event.subscription)
        else {
            self.stats.stale_stream_events += 1;
            debug!(subscription = event.subscription, "Event from closed subscription dropped");
            return Vec::new();
        };

        match event.kind {
            StreamEventKind::Connected => {
                let reconnect = sub.connected_once;
                sub.connected_once = true;
                info!(subscription = sub.id, strategy = %sub.strategy_id, reconnect, "Stream connected");
                if reconnect && self.selection.is_some() {
                    // Events may have been missed while disconnected
                    let mut commands = Vec::new();
                    if self.resync_pending {
                        self.resync_pending = false;
                        commands.push(Command::CancelResync);
                    }
                    commands.extend(self.resync());
                    return commands;
                }
                Vec::new()
            }
            StreamEventKind::Disconnected => {
                info!(subscription = sub.id, strategy = %sub.strategy_id, "Stream disconnected");
                Vec::new()
            }
            StreamEventKind::Message(message) => self.on_message(message),
        }
    }

    fn on_message(&mut self, message: PushMessage) -> Vec<Command> {
        let Reconciled { resync, .. } =
            self.view
                .reconcile(&mut self.render, self.selection.as_ref(), message);
        if !resync {
            return Vec::new();
        }

        let mut commands = Vec::new();
        if self.resync_pending {
            commands.push(Command::CancelResync);
        }
        self.resync_pending = true;
        info!(
            epoch = self.epoch,
            delay_ms = self.config.resync_delay.as_millis() as u64,
            "Resync scheduled"
        );
        commands.push(Command::ScheduleResync {
            epoch: self.epoch,
            delay: self.config.resync_delay,
        });
        commands
    }
}
