//! Session inputs and outputs

use std::time::Duration;

use crate::backend::Instrument;
use crate::snapshot::Snapshot;
use crate::stream::StreamEvent;
use crate::types::{InstrumentState, Selection, TradeRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchReason {
    /// First load after a selection change
    Initial,
    /// Full reload of the same selection
    Resync,
}

/// Identifies which selection and load cycle a fetch belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub epoch: u64,
    pub generation: u64,
    pub selection: Selection,
    pub reason: FetchReason,
    /// Lifecycle events seen when the fetch was issued
    pub live_mark: u64,
}

/// Work the driver performs on behalf of the session
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    FetchSnapshot(FetchTicket),
    FetchTrades(FetchTicket),
    FetchState(FetchTicket),
    FetchInstruments,
    /// Open the push stream for a strategy
    OpenStream {
        subscription: u64,
        strategy_id: String,
    },
    /// Close a push stream; must complete before any later OpenStream
    CloseStream { subscription: u64 },
    /// Narrow (or widen, with None) the server-side push scope
    SendControl { symbol: Option<String> },
    /// Fire `ResyncDue { epoch }` after `delay`, replacing any pending timer
    ScheduleResync { epoch: u64, delay: Duration },
    CancelResync,
}

impl Command {
    pub fn is_fetch(&self) -> bool {
        matches!(
            self,
            Command::FetchSnapshot(_)
                | Command::FetchTrades(_)
                | Command::FetchState(_)
                | Command::FetchInstruments
        )
    }
}

/// Everything that can change session state
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Select(Selection),
    Clear,
    SnapshotLoaded {
        ticket: FetchTicket,
        snapshot: Snapshot,
    },
    TradesLoaded {
        ticket: FetchTicket,
        trades: Vec<TradeRecord>,
    },
    StateLoaded {
        ticket: FetchTicket,
        state: InstrumentState,
    },
    InstrumentsLoaded(Vec<Instrument>),
    Stream(StreamEvent),
    ResyncDue { epoch: u64 },
}
