//! Strategy push-stream client
//!
//! One websocket per strategy (`{ws_url}/{strategy_id}`). Reconnects with
//! exponential backoff and jitter, pings on an interval, and drops the
//! connection when nothing useful arrives for the watchdog window. The
//! viewed symbol is pushed as a `select_symbol` control frame on connect and
//! whenever it changes.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message as TungsteniteMessage};
use tracing::{debug, error, info, warn};

use super::messages::{ControlMessage, PushMessage};
use crate::config::StreamConfig;

const BASE_BACKOFF_SECS: u64 = 1;
const BACKOFF_JITTER_RATIO: f64 = 0.20;
const WATCHDOG_TICK_SECS: u64 = 5;

fn should_reconnect_due_to_silence(last_useful_message: Instant, silence_secs: u64) -> bool {
    last_useful_message.elapsed().as_secs() >= silence_secs
}

fn backoff_with_jitter_secs(attempt: u32, max_secs: u64) -> u64 {
    let max_secs = max_secs.max(1);
    let capped_attempt = attempt.min(16);
    let base = BASE_BACKOFF_SECS.saturating_mul(1u64 << capped_attempt);
    let bounded = base.min(max_secs).max(1);

    let unit: f64 = rand::thread_rng().gen_range(0.0..1.0);
    let jitter = 1.0 + ((unit * 2.0) - 1.0) * BACKOFF_JITTER_RATIO;
    ((bounded as f64) * jitter).round().clamp(1.0, max_secs as f64) as u64
}

/// What the stream reports back to the session
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEventKind {
    Connected,
    Disconnected,
    Message(PushMessage),
}

/// Stream event tagged with the subscription that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub subscription: u64,
    pub kind: StreamEventKind,
}

/// Timing knobs for the connection loop
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub ping_interval: Duration,
    pub watchdog_silence_secs: u64,
    pub max_backoff_secs: u64,
}

impl From<&StreamConfig> for StreamSettings {
    fn from(cfg: &StreamConfig) -> Self {
        Self {
            ping_interval: Duration::from_secs(cfg.ping_interval_secs.max(1)),
            watchdog_silence_secs: cfg.watchdog_silence_secs.max(1),
            max_backoff_secs: cfg.max_backoff_secs,
        }
    }
}

/// Build the per-strategy stream URL
pub fn stream_url(ws_base: &str, strategy_id: &str) -> String {
    format!("{}/{}", ws_base.trim_end_matches('/'), strategy_id)
}

/// Websocket client for one strategy subscription
pub struct StreamClient {
    url: String,
    subscription: u64,
    settings: StreamSettings,
    event_tx: mpsc::Sender<StreamEvent>,
}

impl StreamClient {
    pub fn new(
        ws_base: &str,
        strategy_id: &str,
        subscription: u64,
        settings: StreamSettings,
        event_tx: mpsc::Sender<StreamEvent>,
    ) -> Self {
        Self {
            url: stream_url(ws_base, strategy_id),
            subscription,
            settings,
            event_tx,
        }
    }

    async fn emit(&self, kind: StreamEventKind) -> bool {
        self.event_tx
            .send(StreamEvent {
                subscription: self.subscription,
                kind,
            })
            .await
            .is_ok()
    }

    /// Run until shutdown is signalled (or the shutdown sender is dropped)
    pub async fn run(
        self,
        mut symbol_rx: watch::Receiver<Option<String>>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        let mut reconnect_attempt: u32 = 0;
        loop {
            info!(
                subscription = self.subscription,
                attempt = reconnect_attempt + 1,
                url = %self.url,
                "Connecting to strategy stream"
            );

            let connected = tokio::select! {
                result = connect_async(&self.url) => result,
                _ = shutdown_rx.recv() => {
                    info!(subscription = self.subscription, "Stream shutdown during connect");
                    return Ok(());
                }
            };

            let ws_stream = match connected {
                Ok((ws_stream, _)) => ws_stream,
                Err(e) => {
                    warn!(subscription = self.subscription, error = %e, "Failed to connect strategy stream");
                    reconnect_attempt = reconnect_attempt.saturating_add(1);
                    if !self.sleep_backoff(reconnect_attempt, "connect_failed", &mut shutdown_rx).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            info!(subscription = self.subscription, "Connected to strategy stream");
            reconnect_attempt = 0;
            let (mut write, mut read) = ws_stream.split();

            let control = ControlMessage::SelectSymbol {
                symbol: symbol_rx.borrow_and_update().clone(),
            };
            if let Err(e) = write.send(TungsteniteMessage::Text(control.to_text())).await {
                warn!(error = %e, "Failed to send initial select_symbol");
                reconnect_attempt = reconnect_attempt.saturating_add(1);
                if !self.sleep_backoff(reconnect_attempt, "control_send_failed", &mut shutdown_rx).await {
                    return Ok(());
                }
                continue;
            }

            if !self.emit(StreamEventKind::Connected).await {
                return Ok(());
            }

            let mut ping_interval = tokio::time::interval(self.settings.ping_interval);
            ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            let mut watchdog_interval =
                tokio::time::interval(Duration::from_secs(WATCHDOG_TICK_SECS));
            watchdog_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            let mut last_useful_message = Instant::now();
            let reconnect_reason: &'static str = loop {
                tokio::select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(TungsteniteMessage::Text(text))) => {
                                match self.handle_message(&text).await {
                                    Ok(true) => last_useful_message = Instant::now(),
                                    Ok(false) => {}
                                    Err(e) => debug!(error = %e, "Dropping malformed stream frame"),
                                }
                            }
                            Some(Ok(TungsteniteMessage::Ping(data))) => {
                                let _ = write.send(TungsteniteMessage::Pong(data)).await;
                            }
                            Some(Ok(TungsteniteMessage::Pong(_))) => {
                                last_useful_message = Instant::now();
                            }
                            Some(Ok(TungsteniteMessage::Close(_))) => {
                                info!(subscription = self.subscription, "Strategy stream closed by server");
                                break "remote_close";
                            }
                            Some(Err(e)) => {
                                error!(subscription = self.subscription, error = %e, "Strategy stream error");
                                break "stream_error";
                            }
                            None => {
                                info!(subscription = self.subscription, "Strategy stream ended");
                                break "stream_ended";
                            }
                            _ => {}
                        }
                    }

                    changed = symbol_rx.changed() => {
                        if changed.is_err() {
                            let _ = write.send(TungsteniteMessage::Close(None)).await;
                            return Ok(());
                        }
                        let control = ControlMessage::SelectSymbol {
                            symbol: symbol_rx.borrow_and_update().clone(),
                        };
                        debug!(subscription = self.subscription, frame = %control.to_text(), "Sending control");
                        if let Err(e) = write.send(TungsteniteMessage::Text(control.to_text())).await {
                            warn!(error = %e, "Failed to send select_symbol");
                            break "control_send_failed";
                        }
                    }

                    _ = ping_interval.tick() => {
                        if let Err(e) = write.send(TungsteniteMessage::Ping(Vec::new())).await {
                            warn!(error = %e, "Strategy stream ping failed; reconnecting");
                            break "ping_send_failed";
                        }
                    }

                    _ = watchdog_interval.tick() => {
                        if should_reconnect_due_to_silence(
                            last_useful_message,
                            self.settings.watchdog_silence_secs,
                        ) {
                            warn!(
                                silence_secs = self.settings.watchdog_silence_secs,
                                "Strategy stream watchdog timeout: reconnecting"
                            );
                            let _ = write.send(TungsteniteMessage::Close(None)).await;
                            break "watchdog_timeout";
                        }
                    }

                    _ = shutdown_rx.recv() => {
                        info!(subscription = self.subscription, "Shutting down strategy stream");
                        let _ = write.send(TungsteniteMessage::Close(None)).await;
                        return Ok(());
                    }
                }
            };

            if !self.emit(StreamEventKind::Disconnected).await {
                return Ok(());
            }
            reconnect_attempt = reconnect_attempt.saturating_add(1);
            if !self.sleep_backoff(reconnect_attempt, reconnect_reason, &mut shutdown_rx).await {
                return Ok(());
            }
        }
    }

    /// Sleep before the next attempt. False when shutdown arrived meanwhile.
    async fn sleep_backoff(
        &self,
        attempt: u32,
        reason: &'static str,
        shutdown_rx: &mut mpsc::Receiver<()>,
    ) -> bool {
        let sleep_secs = backoff_with_jitter_secs(attempt, self.settings.max_backoff_secs);
        warn!(
            subscription = self.subscription,
            reason,
            attempt,
            sleep_secs,
            "Strategy stream reconnect scheduled"
        );
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(sleep_secs)) => true,
            _ = shutdown_rx.recv() => false,
        }
    }

    /// Decode and forward one text frame. Ok(true) when it carried data.
    async fn handle_message(&self, text: &str) -> Result<bool> {
        let message = PushMessage::decode(text).context("decode push frame")?;
        if message == PushMessage::Unknown {
            debug!("Ignoring unknown push message type");
            return Ok(false);
        }
        self.emit(StreamEventKind::Message(message)).await;
        Ok(true)
    }
}
