//! Driver tests with a static backend and an in-process stream

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot, watch};

    use stratview::backend::{Backend, Instrument};
    use stratview::driver::{Driver, DriverCommand, StreamConnector, StreamHandle};
    use stratview::error::FetchError;
    use stratview::render::SceneRecorder;
    use stratview::session::{Session, SessionConfig};
    use stratview::snapshot::{synthetic, SnapshotLoader};
    use stratview::stream::{PushMessage, StreamEvent, StreamEventKind};
    use stratview::types::{
        Candle, InstrumentState, Selection, Side, StrategyMeta, TradeRecord,
    };

    const END: i64 = 1_700_000_000;

    type Tx = mpsc::Sender<DriverCommand<SceneRecorder>>;

    // ============================================================================
    // Fakes
    // ============================================================================

    struct StaticBackend {
        trades: Arc<Mutex<Vec<TradeRecord>>>,
    }

    #[async_trait]
    impl Backend for StaticBackend {
        async fn fetch_candles(
            &self,
            strategy_id: &str,
            symbol: &str,
            _resolution: &str,
            limit: usize,
        ) -> Result<Vec<Candle>, FetchError> {
            let selection = Selection::new(strategy_id, symbol);
            let schema = synthetic::fallback_schema();
            Ok(synthetic::fallback_candles(&selection, &schema, limit.min(100), 300, END))
        }

        async fn fetch_trades(
            &self,
            _strategy_id: &str,
            _symbol: &str,
        ) -> Result<Vec<TradeRecord>, FetchError> {
            Ok(self.trades.lock().unwrap().clone())
        }

        async fn fetch_state(
            &self,
            _strategy_id: &str,
            _symbol: &str,
        ) -> Result<InstrumentState, FetchError> {
            Ok(InstrumentState::default())
        }

        async fn fetch_strategies(&self) -> Result<Vec<StrategyMeta>, FetchError> {
            Ok(vec![StrategyMeta {
                strategy_id: "ttb".into(),
                name: Some("Top Trend Breakout".into()),
                symbols: vec!["BTCUSDT".into(), "ETHUSDT".into()],
                timeframes: vec!["5".into()],
                indicators_config: json!({
                    "price": {"ema_fast": {}, "ema_slow": {"style": "dashed"}},
                    "oscillator": {"osc": {}, "upper": {"value": 70}}
                }),
            }])
        }

        async fn fetch_instruments(&self) -> Result<Vec<Instrument>, FetchError> {
            Err(FetchError::Status(503))
        }
    }

    /// Hands out in-process channels instead of websockets
    #[derive(Default)]
    struct LocalConnector {
        opened: Mutex<Vec<(u64, mpsc::Sender<StreamEvent>)>>,
        symbols: Mutex<Vec<watch::Receiver<Option<String>>>>,
    }

    impl LocalConnector {
        fn latest(&self) -> Option<(u64, mpsc::Sender<StreamEvent>)> {
            self.opened.lock().unwrap().last().cloned()
        }
    }

    impl StreamConnector for LocalConnector {
        fn open(
            &self,
            subscription: u64,
            _strategy_id: &str,
            symbol_rx: watch::Receiver<Option<String>>,
            event_tx: mpsc::Sender<StreamEvent>,
        ) -> StreamHandle {
            self.opened.lock().unwrap().push((subscription, event_tx));
            self.symbols.lock().unwrap().push(symbol_rx);
            StreamHandle::new(subscription, None, tokio::spawn(async {}))
        }
    }

    // ============================================================================
    // Helpers
    // ============================================================================

    struct Harness {
        tx: Tx,
        connector: Arc<LocalConnector>,
        trades: Arc<Mutex<Vec<TradeRecord>>>,
        task: tokio::task::JoinHandle<anyhow::Result<()>>,
    }

    fn start(trades: Vec<TradeRecord>) -> Harness {
        let trades = Arc::new(Mutex::new(trades));
        let backend: Arc<dyn Backend> = Arc::new(StaticBackend {
            trades: Arc::clone(&trades),
        });
        let loader = SnapshotLoader::new(Arc::clone(&backend), "5", 100, 100);
        let connector = Arc::new(LocalConnector::default());
        let session = Session::new(SceneRecorder::new(), SessionConfig::default());
        let driver = Driver::new(session, backend, loader, connector.clone(), 64);
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(driver.run(rx));
        Harness {
            tx,
            connector,
            trades,
            task,
        }
    }

    async fn inspect<T, F>(tx: &Tx, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&mut Session<SceneRecorder>) -> T + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = move |session: &mut Session<SceneRecorder>| {
            let _ = reply_tx.send(f(session));
        };
        assert!(tx.send(DriverCommand::Inspect(Box::new(request))).await.is_ok());
        reply_rx.await.expect("driver answered")
    }

    async fn wait_for<F>(tx: &Tx, what: &str, check: F)
    where
        F: Fn(&mut Session<SceneRecorder>) -> bool + Send + Sync + Copy + 'static,
    {
        for _ in 0..200 {
            if inspect(tx, check).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    async fn push(connector: &LocalConnector, message: Value) {
        let (subscription, sender) = connector.latest().expect("stream opened");
        let message = PushMessage::decode(&message.to_string()).expect("valid message");
        sender
            .send(StreamEvent {
                subscription,
                kind: StreamEventKind::Message(message),
            })
            .await
            .expect("driver listening");
    }

    fn trade(side: Side, entry: i64, exit: i64, pnl: f64) -> TradeRecord {
        TradeRecord {
            entry_time: entry,
            exit_time: Some(exit),
            side,
            pnl: Some(pnl),
            entry_price: None,
            exit_price: None,
        }
    }

    fn trade_closed(symbol: &str) -> Value {
        json!({
            "type": "update",
            "event": "TradeTerminalEvent",
            "data": {"strategy_id": "ttb", "symbol": symbol, "trigger_type": "SL", "pnl": -4.0}
        })
    }

    async fn stop(h: Harness) {
        assert!(h.tx.send(DriverCommand::Shutdown).await.is_ok());
        h.task.await.expect("driver task").expect("driver result");
    }

    // ============================================================================
    // Tests
    // ============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_select_builds_view_from_backend() {
        let h = start(vec![trade(Side::Long, END - 6000, END - 3000, 1.0)]);
        assert!(h.tx.send(DriverCommand::Select(Selection::new("ttb", "BTCUSDT"))).await.is_ok());

        wait_for(&h.tx, "view built", |s| s.view().chart.marker_count() == 2).await;

        let (synthetic, schema_series) = inspect(&h.tx, |s| {
            (s.view().chart.is_synthetic(), s.view().chart.assignment().series.len())
        })
        .await;
        assert!(!synthetic);
        // ema_fast, ema_slow, osc
        assert_eq!(schema_series, 3);
        stop(h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_trade_close_resyncs_after_delay_and_keeps_zoom() {
        let h = start(vec![trade(Side::Long, END - 6000, END - 3000, 1.0)]);
        assert!(h.tx.send(DriverCommand::Select(Selection::new("ttb", "BTCUSDT"))).await.is_ok());
        wait_for(&h.tx, "view built", |s| s.view().chart.marker_count() == 2).await;

        inspect(&h.tx, |s| s.render_mut().set_visible_range(END - 900, END)).await;
        h.trades
            .lock()
            .unwrap()
            .push(trade(Side::Short, END - 2400, END - 600, -4.0));
        push(&h.connector, trade_closed("BTCUSDT")).await;

        // Scheduled, but nothing reloads before the debounce delay
        wait_for(&h.tx, "resync scheduled", |s| s.resync_pending() && s.stats().resyncs == 0).await;

        wait_for(&h.tx, "resync", |s| s.stats().resyncs == 1 && s.view().chart.marker_count() == 4).await;

        let (range, fits) = inspect(&h.tx, |s| (s.render().visible_range(), s.render().fit_count())).await;
        assert_eq!(range, Some((END - 900, END)));
        assert_eq!(fits, 1);
        stop(h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reselect_cancels_pending_resync() {
        let h = start(Vec::new());
        assert!(h.tx.send(DriverCommand::Select(Selection::new("ttb", "BTCUSDT"))).await.is_ok());
        wait_for(&h.tx, "view built", |s| s.view().chart.is_built()).await;

        push(&h.connector, trade_closed("BTCUSDT")).await;
        wait_for(&h.tx, "resync scheduled", |s| s.resync_pending()).await;

        assert!(h.tx.send(DriverCommand::Select(Selection::new("ttb", "ETHUSDT"))).await.is_ok());
        wait_for(&h.tx, "second view", |s| {
            s.view().chart.selection().map(|sel| sel.symbol.as_str()) == Some("ETHUSDT")
        })
        .await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        let stats = inspect(&h.tx, |s| s.stats()).await;
        assert_eq!(stats.resyncs, 0);
        stop(h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_triggers_resync() {
        let h = start(Vec::new());
        assert!(h.tx.send(DriverCommand::Select(Selection::new("ttb", "BTCUSDT"))).await.is_ok());
        wait_for(&h.tx, "view built", |s| s.view().chart.is_built()).await;

        let (subscription, sender) = h.connector.latest().expect("stream opened");
        for kind in [
            StreamEventKind::Connected,
            StreamEventKind::Disconnected,
            StreamEventKind::Connected,
        ] {
            sender
                .send(StreamEvent { subscription, kind })
                .await
                .expect("driver listening");
        }

        wait_for(&h.tx, "resync", |s| s.stats().resyncs == 1).await;
        stop(h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_strategy_switch_opens_new_subscription() {
        let h = start(Vec::new());
        assert!(h.tx.send(DriverCommand::Select(Selection::new("ttb", "BTCUSDT"))).await.is_ok());
        wait_for(&h.tx, "view built", |s| s.view().chart.is_built()).await;
        assert!(h.tx.send(DriverCommand::Select(Selection::new("mr", "BTCUSDT"))).await.is_ok());
        wait_for(&h.tx, "switch", |s| s.subscription() == Some(2)).await;

        let ids: Vec<u64> = h.connector.opened.lock().unwrap().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2]);

        // Unknown strategy falls back to the default schema
        wait_for(&h.tx, "second view", |s| {
            s.view().chart.selection().map(|sel| sel.strategy_id.as_str()) == Some("mr")
        })
        .await;
        let (synthetic, series) = inspect(&h.tx, |s| {
            (s.view().chart.is_synthetic(), s.view().chart.assignment().series.len())
        })
        .await;
        assert!(synthetic);
        // ema_fast, ema_slow, volume, osc
        assert_eq!(series, 4);
        stop(h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_strategy_switch_scopes_symbol_per_subscription() {
        let h = start(Vec::new());
        assert!(h.tx.send(DriverCommand::Select(Selection::new("ttb", "BTCUSDT"))).await.is_ok());
        wait_for(&h.tx, "view built", |s| s.view().chart.is_built()).await;
        assert!(h.tx.send(DriverCommand::Select(Selection::new("mr", "ETHUSDT"))).await.is_ok());
        wait_for(&h.tx, "switch", |s| s.subscription() == Some(2)).await;

        let symbols = h.connector.symbols.lock().unwrap().clone();
        assert_eq!(symbols.len(), 2);
        // The old socket never sees the new pair and its scope is closed
        assert_eq!(symbols[0].borrow().as_deref(), Some("BTCUSDT"));
        assert!(symbols[0].has_changed().is_err());
        assert_eq!(symbols[1].borrow().as_deref(), Some("ETHUSDT"));
        stop(h).await;
    }
}
