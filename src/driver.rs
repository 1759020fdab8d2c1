//! Async runtime shell around [`Session`]
//!
//! All session transitions run on the driver task, one event at a time.
//! Fetches run as spawned tasks and report back through a channel; stream
//! events arrive on another channel; the resync timer is an abortable task.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::render::RenderPort;
use crate::session::{Command, FetchTicket, Session, SessionEvent};
use crate::snapshot::SnapshotLoader;
use crate::stream::{StreamClient, StreamEvent, StreamSettings};
use crate::types::{InstrumentState, Selection, TradeRecord};

/// Time a closing stream gets to send its Close frame before it is aborted
const STREAM_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Requests from the outside world (UI, stdin)
pub enum DriverCommand<R: RenderPort> {
    Select(Selection),
    Clear,
    /// Run a closure against the session between events
    Inspect(Box<dyn FnOnce(&mut Session<R>) + Send>),
    Shutdown,
}

/// Running stream task
pub struct StreamHandle {
    pub subscription: u64,
    shutdown_tx: Option<mpsc::Sender<()>>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    pub fn new(subscription: u64, shutdown_tx: Option<mpsc::Sender<()>>, task: JoinHandle<()>) -> Self {
        Self {
            subscription,
            shutdown_tx,
            task,
        }
    }

    /// Signal shutdown and let the task finish in the background. Nothing it
    /// produces afterwards reaches the session because the subscription id
    /// is no longer current.
    pub fn close(self) {
        tokio::spawn(self.shutdown());
    }

    /// Signal shutdown and wait for the task, aborting it after the grace period
    pub async fn shutdown(self) {
        let StreamHandle {
            subscription,
            shutdown_tx,
            mut task,
        } = self;
        if let Some(tx) = shutdown_tx {
            let _ = tx.try_send(());
        }
        if tokio::time::timeout(STREAM_CLOSE_GRACE, &mut task).await.is_err() {
            debug!(subscription, "Stream task did not stop in time; aborting");
            task.abort();
        }
    }
}

/// Opens push-stream subscriptions
pub trait StreamConnector: Send + Sync {
    fn open(
        &self,
        subscription: u64,
        strategy_id: &str,
        symbol_rx: watch::Receiver<Option<String>>,
        event_tx: mpsc::Sender<StreamEvent>,
    ) -> StreamHandle;
}

/// Websocket connector backed by [`StreamClient`]
pub struct WsConnector {
    ws_url: String,
    settings: StreamSettings,
}

impl WsConnector {
    pub fn new(ws_url: &str, settings: StreamSettings) -> Self {
        Self {
            ws_url: ws_url.to_string(),
            settings,
        }
    }
}

impl StreamConnector for WsConnector {
    fn open(
        &self,
        subscription: u64,
        strategy_id: &str,
        symbol_rx: watch::Receiver<Option<String>>,
        event_tx: mpsc::Sender<StreamEvent>,
    ) -> StreamHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let client = StreamClient::new(&self.ws_url, strategy_id, subscription, self.settings, event_tx);
        let task = tokio::spawn(async move {
            if let Err(e) = client.run(symbol_rx, shutdown_rx).await {
                warn!(subscription, error = %e, "Strategy stream task failed");
            }
        });
        StreamHandle::new(subscription, Some(shutdown_tx), task)
    }
}

pub struct Driver<R: RenderPort> {
    session: Session<R>,
    backend: Arc<dyn Backend>,
    loader: Arc<SnapshotLoader>,
    connector: Arc<dyn StreamConnector>,
    result_tx: mpsc::Sender<SessionEvent>,
    result_rx: mpsc::Receiver<SessionEvent>,
    stream_tx: mpsc::Sender<StreamEvent>,
    stream_rx: mpsc::Receiver<StreamEvent>,
    /// Symbol scope of the open stream; each subscription gets its own channel
    symbol_tx: Option<watch::Sender<Option<String>>>,
    stream: Option<StreamHandle>,
    resync_timer: Option<JoinHandle<()>>,
}

impl<R: RenderPort> Driver<R> {
    pub fn new(
        session: Session<R>,
        backend: Arc<dyn Backend>,
        loader: SnapshotLoader,
        connector: Arc<dyn StreamConnector>,
        channel_capacity: usize,
    ) -> Self {
        let (result_tx, result_rx) = mpsc::channel(channel_capacity.max(1));
        let (stream_tx, stream_rx) = mpsc::channel(channel_capacity.max(1));
        Self {
            session,
            backend,
            loader: Arc::new(loader),
            connector,
            result_tx,
            result_rx,
            stream_tx,
            stream_rx,
            symbol_tx: None,
            stream: None,
            resync_timer: None,
        }
    }

    /// Process commands and events until shutdown or the command channel closes
    pub async fn run(mut self, mut commands: mpsc::Receiver<DriverCommand<R>>) -> Result<()> {
        for command in self.session.bootstrap() {
            self.execute(command);
        }

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(DriverCommand::Select(selection)) => self.dispatch(SessionEvent::Select(selection)),
                        Some(DriverCommand::Clear) => self.dispatch(SessionEvent::Clear),
                        Some(DriverCommand::Inspect(f)) => f(&mut self.session),
                        Some(DriverCommand::Shutdown) | None => break,
                    }
                }
                Some(event) = self.result_rx.recv() => self.dispatch(event),
                Some(event) = self.stream_rx.recv() => self.dispatch(SessionEvent::Stream(event)),
            }
        }

        info!("Driver shutting down");
        self.symbol_tx = None;
        if let Some(stream) = self.stream.take() {
            stream.shutdown().await;
        }
        if let Some(timer) = self.resync_timer.take() {
            timer.abort();
        }
        Ok(())
    }

    fn dispatch(&mut self, event: SessionEvent) {
        for command in self.session.handle(event) {
            self.execute(command);
        }
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::FetchSnapshot(ticket) => {
                let loader = Arc::clone(&self.loader);
                let tx = self.result_tx.clone();
                tokio::spawn(async move {
                    let snapshot = loader.load(&ticket.selection).await;
                    let _ = tx.send(SessionEvent::SnapshotLoaded { ticket, snapshot }).await;
                });
            }
            Command::FetchTrades(ticket) => {
                let backend = Arc::clone(&self.backend);
                let tx = self.result_tx.clone();
                tokio::spawn(async move {
                    let trades = fetch_trades(backend.as_ref(), &ticket).await;
                    let _ = tx.send(SessionEvent::TradesLoaded { ticket, trades }).await;
                });
            }
            Command::FetchState(ticket) => {
                let backend = Arc::clone(&self.backend);
                let tx = self.result_tx.clone();
                tokio::spawn(async move {
                    let state = fetch_state(backend.as_ref(), &ticket).await;
                    let _ = tx.send(SessionEvent::StateLoaded { ticket, state }).await;
                });
            }
            Command::FetchInstruments => {
                let backend = Arc::clone(&self.backend);
                let tx = self.result_tx.clone();
                tokio::spawn(async move {
                    match backend.fetch_instruments().await {
                        Ok(instruments) => {
                            let _ = tx.send(SessionEvent::InstrumentsLoaded(instruments)).await;
                        }
                        Err(e) => warn!(kind = e.kind(), error = %e, "Instrument list unavailable"),
                    }
                });
            }
            Command::OpenStream {
                subscription,
                strategy_id,
            } => {
                if let Some(previous) = self.stream.take() {
                    previous.close();
                }
                info!(subscription, strategy = %strategy_id, "Opening strategy stream");
                let (symbol_tx, symbol_rx) = watch::channel(None);
                self.symbol_tx = Some(symbol_tx);
                self.stream = Some(self.connector.open(
                    subscription,
                    &strategy_id,
                    symbol_rx,
                    self.stream_tx.clone(),
                ));
            }
            Command::CloseStream { subscription } => match self.stream.take() {
                Some(stream) if stream.subscription == subscription => {
                    info!(subscription, "Closing strategy stream");
                    self.symbol_tx = None;
                    stream.close();
                }
                other => self.stream = other,
            },
            Command::SendControl { symbol } => match &self.symbol_tx {
                Some(tx) => {
                    debug!(symbol = ?symbol, "select_symbol");
                    tx.send_replace(symbol);
                }
                None => debug!(symbol = ?symbol, "No open stream for select_symbol"),
            },
            Command::ScheduleResync { epoch, delay } => {
                self.cancel_timer();
                let tx = self.result_tx.clone();
                self.resync_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(SessionEvent::ResyncDue { epoch }).await;
                }));
            }
            Command::CancelResync => self.cancel_timer(),
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.resync_timer.take() {
            timer.abort();
        }
    }
}

async fn fetch_trades(backend: &dyn Backend, ticket: &FetchTicket) -> Vec<TradeRecord> {
    let sel = &ticket.selection;
    match backend.fetch_trades(&sel.strategy_id, &sel.symbol).await {
        Ok(trades) => trades,
        Err(e) => {
            warn!(selection = %sel, kind = e.kind(), error = %e, "Trade history unavailable; showing none");
            Vec::new()
        }
    }
}

async fn fetch_state(backend: &dyn Backend, ticket: &FetchTicket) -> InstrumentState {
    let sel = &ticket.selection;
    match backend.fetch_state(&sel.strategy_id, &sel.symbol).await {
        Ok(state) => state,
        Err(e) => {
            warn!(selection = %sel, kind = e.kind(), error = %e, "Position state unavailable; assuming flat");
            InstrumentState::default()
        }
    }
}
