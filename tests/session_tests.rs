//! End-to-end session tests against the in-memory scene

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use stratview::backend::{Instrument, InstrumentStatus, InstrumentStrategy};
    use stratview::chart::annotations::RiskLineKind;
    use stratview::render::{RenderPort, SceneRecorder};
    use stratview::session::{Command, FetchReason, FetchTicket, Session, SessionConfig, SessionEvent};
    use stratview::snapshot::{price_precision, synthetic, Snapshot};
    use stratview::stream::{PushMessage, StreamEvent, StreamEventKind};
    use stratview::types::{
        IndicatorSchema, InstrumentState, Order, Position, Selection, Side, TradeRecord,
    };

    const END: i64 = 1_700_000_000;
    const STEP: i64 = 300;

    // ============================================================================
    // Helpers
    // ============================================================================

    fn session() -> Session<SceneRecorder> {
        Session::new(SceneRecorder::new(), SessionConfig::default())
    }

    fn ticket_of(commands: &[Command]) -> FetchTicket {
        commands
            .iter()
            .find_map(|c| match c {
                Command::FetchSnapshot(t) => Some(t.clone()),
                _ => None,
            })
            .expect("select should issue a snapshot fetch")
    }

    fn wide_schema() -> IndicatorSchema {
        IndicatorSchema::from_value(&json!({
            "price": {"vwap": {}, "st_up": {"style": "dashed"}, "st_down": {"style": "dashed"}},
            "volume": {"volume": {"type": "histogram"}, "delta": {"type": "histogram"}},
            "stoch": {"k": {}, "d": {"style": "dotted"}, "hi": {"value": 80}, "lo": {"value": 20}},
            "rsi": {"rsi": {}, "mid": {"value": 50}}
        }))
    }

    fn snapshot_for(ticket: &FetchTicket, schema: IndicatorSchema) -> Snapshot {
        let candles = synthetic::fallback_candles(&ticket.selection, &schema, 50, STEP, END);
        Snapshot {
            selection: ticket.selection.clone(),
            precision: price_precision(candles[0].close),
            candles,
            schema,
            resolution: "5".into(),
            synthetic: false,
        }
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

    /// Select and deliver every fetch result for the selection
    fn load(
        s: &mut Session<SceneRecorder>,
        selection: Selection,
        schema: IndicatorSchema,
        trades: Vec<TradeRecord>,
    ) -> FetchTicket {
        let commands = s.handle(SessionEvent::Select(selection));
        let ticket = ticket_of(&commands);
        deliver(s, &ticket, schema, trades, InstrumentState::default());
        ticket
    }

    fn deliver(
        s: &mut Session<SceneRecorder>,
        ticket: &FetchTicket,
        schema: IndicatorSchema,
        trades: Vec<TradeRecord>,
        state: InstrumentState,
    ) {
        s.handle(SessionEvent::SnapshotLoaded {
            ticket: ticket.clone(),
            snapshot: snapshot_for(ticket, schema),
        });
        s.handle(SessionEvent::TradesLoaded {
            ticket: ticket.clone(),
            trades,
        });
        s.handle(SessionEvent::StateLoaded {
            ticket: ticket.clone(),
            state,
        });
    }

    fn push(s: &mut Session<SceneRecorder>, message: Value) -> Vec<Command> {
        let subscription = s.subscription().expect("stream should be open");
        let message = PushMessage::decode(&message.to_string()).expect("valid push message");
        s.handle(SessionEvent::Stream(StreamEvent {
            subscription,
            kind: StreamEventKind::Message(message),
        }))
    }

    fn position_update(side: &str, tp: Option<f64>, sl: Option<f64>) -> Value {
        json!({
            "type": "update",
            "event": "PositionStateEvent",
            "data": {
                "strategy_id": "ttb", "symbol": "BTCUSDT", "side": side, "size": 1.0,
                "entry_price": 100.0, "unrealised_pnl": 0.0, "take_profit": tp, "stop_loss": sl
            }
        })
    }

    fn trade_closed() -> Value {
        json!({
            "type": "update",
            "event": "TradeTerminalEvent",
            "data": {
                "strategy_id": "ttb", "symbol": "BTCUSDT", "trigger_type": "TP",
                "exit_price": 110.0, "pnl": 10.0, "realised_pnl": 10.0
            }
        })
    }

    fn btc() -> Selection {
        Selection::new("ttb", "BTCUSDT")
    }

    // ============================================================================
    // Selection lifecycle
    // ============================================================================

    #[test]
    fn test_reselection_does_not_leak_series() {
        let mut s = session();
        let a = btc();
        let b = Selection::new("mr", "ETHUSDT");

        load(&mut s, a.clone(), synthetic::fallback_schema(), Vec::new());
        let baseline = s.render().live_series();

        for _ in 0..5 {
            load(&mut s, b.clone(), wide_schema(), Vec::new());
            assert!(s.render().live_series() > baseline);
            load(&mut s, a.clone(), synthetic::fallback_schema(), Vec::new());
            assert_eq!(s.render().live_series(), baseline);
        }

        let scene = s.render();
        assert_eq!(scene.allocated_total() - scene.released_total(), scene.live_series());
        assert_eq!(scene.live_series(), s.view().chart.assignment().handle_count());
    }

    #[test]
    fn test_stale_responses_do_not_touch_new_selection() {
        let mut s = session();
        let ticket_a = ticket_of(&s.handle(SessionEvent::Select(btc())));
        let ticket_b = ticket_of(&s.handle(SessionEvent::Select(Selection::new("ttb", "ETHUSDT"))));
        deliver(&mut s, &ticket_b, synthetic::fallback_schema(), Vec::new(), InstrumentState::default());
        let before = s.render().summary();

        deliver(
            &mut s,
            &ticket_a,
            wide_schema(),
            vec![trade(Side::Long, END - 3000, END - 1500, 5.0)],
            InstrumentState {
                position: Some(Position {
                    symbol: "BTCUSDT".into(),
                    side: Side::Long,
                    entry_price: 1.0,
                    take_profit: Some(2.0),
                    stop_loss: Some(0.5),
                    unrealized_pnl: 0.0,
                    size: None,
                }),
                order: None,
            },
        );

        assert_eq!(s.render().summary(), before);
        assert_eq!(s.stats().stale_results, 3);
        assert_eq!(s.view().chart.selection(), Some(&ticket_b.selection));
        assert!(s.view().tracker.position().is_none());
    }

    #[test]
    fn test_first_load_fits_content_once() {
        let mut s = session();
        load(&mut s, btc(), synthetic::fallback_schema(), Vec::new());
        assert_eq!(s.render().fit_count(), 1);
        assert_eq!(s.render().visible_range(), Some((END - 49 * STEP, END)));
        let precision = s.view().chart.precision();
        assert_eq!(s.render().price_format().map(|f| f.precision), Some(precision));
    }

    #[test]
    fn test_clear_releases_everything() {
        let mut s = session();
        load(&mut s, btc(), wide_schema(), Vec::new());
        s.handle(SessionEvent::Clear);
        assert_eq!(s.render().live_series(), 0);
        assert!(!s.view().chart.is_built());
    }

    // ============================================================================
    // Position lifecycle
    // ============================================================================

    #[test]
    fn test_open_to_flat_clears_exactly_three_lines() {
        let mut s = session();
        load(&mut s, btc(), synthetic::fallback_schema(), Vec::new());
        let references = s.render().price_line_count();

        push(&mut s, position_update("LONG", Some(110.0), Some(95.0)));
        assert_eq!(s.render().price_line_count(), references + 3);

        // Updated position replaces the set, it does not add to it
        push(&mut s, position_update("LONG", Some(112.0), Some(96.0)));
        assert_eq!(s.render().price_line_count(), references + 3);

        push(&mut s, position_update("FLAT", None, None));
        assert_eq!(s.render().price_line_count(), references);
        assert_eq!(s.view().chart.risk_line_count(), 0);
    }

    #[test]
    fn test_missing_tp_sl_are_not_drawn() {
        let mut s = session();
        load(&mut s, btc(), synthetic::fallback_schema(), Vec::new());
        push(&mut s, position_update("SHORT", None, None));
        assert_eq!(s.view().chart.risk_line_count(), 1);
    }

    #[test]
    fn test_fetched_state_does_not_override_live_events() {
        let mut s = session();
        let ticket = ticket_of(&s.handle(SessionEvent::Select(btc())));
        s.handle(SessionEvent::SnapshotLoaded {
            ticket: ticket.clone(),
            snapshot: snapshot_for(&ticket, synthetic::fallback_schema()),
        });
        push(&mut s, position_update("LONG", Some(110.0), None));

        s.handle(SessionEvent::StateLoaded {
            ticket,
            state: InstrumentState::default(),
        });
        assert_eq!(s.view().tracker.position().map(|p| p.side), Some(Side::Long));
    }

    #[test]
    fn test_seeded_order_line_until_position_opens() {
        let mut s = session();
        let ticket = ticket_of(&s.handle(SessionEvent::Select(btc())));
        deliver(
            &mut s,
            &ticket,
            synthetic::fallback_schema(),
            Vec::new(),
            InstrumentState {
                position: None,
                order: Some(Order {
                    order_type: "LIMIT".into(),
                    price: Some(99.0),
                    side: Some("BUY".into()),
                }),
            },
        );
        assert!(s.render().price_line_titles().contains(&"LIMIT ORDER".to_string()));

        push(&mut s, position_update("LONG", Some(110.0), Some(95.0)));
        assert!(!s.render().price_line_titles().contains(&"LIMIT ORDER".to_string()));
        assert_eq!(s.view().chart.risk_line_count(), 3);
    }

    #[test]
    fn test_filled_order_drops_order_line_and_resyncs() {
        let mut s = session();
        s.handle(SessionEvent::InstrumentsLoaded(vec![Instrument {
            symbol: "BTCUSDT".into(),
            last_price: 40_000.0,
            strategies: vec![InstrumentStrategy {
                strategy_id: "ttb".into(),
                strategy_name: None,
                status: InstrumentStatus::Wait,
            }],
        }]));
        load(&mut s, btc(), synthetic::fallback_schema(), Vec::new());
        let order = |status: Option<&str>| {
            json!({
                "type": "update",
                "event": "OrderExecutionEvent",
                "data": {
                    "strategy_id": "ttb", "symbol": "BTCUSDT", "order_id": "42",
                    "order_type": "LIMIT", "side": "BUY", "price": 99.0, "qty": 1.0,
                    "status": status
                }
            })
        };

        push(&mut s, order(None));
        assert_eq!(s.view().chart.risk_kinds(), vec![RiskLineKind::PendingOrder]);
        assert_eq!(
            s.view().watchlist.row("BTCUSDT").map(|r| r.statuses["ttb"]),
            Some(InstrumentStatus::Pending)
        );

        let commands = push(&mut s, order(Some("FILLED")));
        assert!(!s.view().chart.risk_kinds().contains(&RiskLineKind::PendingOrder));
        assert!(!s.render().price_line_titles().contains(&"LIMIT ORDER".to_string()));
        assert_eq!(
            s.view().watchlist.row("BTCUSDT").map(|r| r.statuses["ttb"]),
            Some(InstrumentStatus::Intrade)
        );
        assert!(matches!(commands.last(), Some(Command::ScheduleResync { .. })));
        assert!(s.resync_pending());
    }

    // ============================================================================
    // Live updates and resync
    // ============================================================================

    #[test]
    fn test_trade_closed_resync_keeps_zoom_and_adds_markers() {
        let mut s = session();
        let first = trade(Side::Long, END - 6000, END - 4500, 3.0);
        let ticket = load(&mut s, btc(), synthetic::fallback_schema(), vec![first.clone()]);
        let candles = s.view().chart.assignment().candles.expect("candle series");
        assert_eq!(s.render().markers(candles).len(), 2);

        s.render_mut().set_visible_range(END - 1200, END);

        let commands = push(&mut s, trade_closed());
        let epoch = match commands.last() {
            Some(Command::ScheduleResync { epoch, .. }) => *epoch,
            other => panic!("expected ScheduleResync, got {other:?}"),
        };
        assert_eq!(epoch, ticket.epoch);

        let commands = s.handle(SessionEvent::ResyncDue { epoch });
        let resync = ticket_of(&commands);
        assert_eq!(resync.reason, FetchReason::Resync);
        assert_eq!(resync.generation, ticket.generation + 1);

        let second = trade(Side::Short, END - 3000, END - 600, -2.0);
        deliver(
            &mut s,
            &resync,
            synthetic::fallback_schema(),
            vec![first, second],
            InstrumentState::default(),
        );

        let candles = s.view().chart.assignment().candles.expect("candle series");
        let markers = s.render().markers(candles);
        assert_eq!(markers.len(), 4);
        assert!(markers.windows(2).all(|w| w[0].time <= w[1].time));
        assert_eq!(markers[3].text, "EXIT -2.00");
        assert_eq!(s.render().visible_range(), Some((END - 1200, END)));
        assert_eq!(s.render().fit_count(), 1);
        assert_eq!(s.render().unordered_marker_sets(), 0);
    }

    #[test]
    fn test_second_trade_close_restarts_timer() {
        let mut s = session();
        load(&mut s, btc(), synthetic::fallback_schema(), Vec::new());
        push(&mut s, trade_closed());
        let commands = push(&mut s, trade_closed());
        assert!(matches!(commands.first(), Some(Command::CancelResync)));
        assert!(matches!(commands.last(), Some(Command::ScheduleResync { .. })));
    }

    #[test]
    fn test_resync_timer_from_previous_selection_is_ignored() {
        let mut s = session();
        load(&mut s, btc(), synthetic::fallback_schema(), Vec::new());
        push(&mut s, trade_closed());
        let old_epoch = s.epoch();

        let commands = s.handle(SessionEvent::Select(Selection::new("ttb", "ETHUSDT")));
        assert!(matches!(commands.first(), Some(Command::CancelResync)));

        assert!(s.handle(SessionEvent::ResyncDue { epoch: old_epoch }).is_empty());
        assert_eq!(s.stats().resyncs, 0);
    }

    #[test]
    fn test_foreign_candle_update_is_invisible() {
        let mut s = session();
        load(&mut s, btc(), synthetic::fallback_schema(), Vec::new());
        let before = s.render().summary();
        let updates_before: usize = s.render().all_series().map(|(_, r)| r.update_count).sum();

        for (strategy, symbol) in [("ttb", "ETHUSDT"), ("other", "BTCUSDT")] {
            push(
                &mut s,
                json!({
                    "type": "candle_update", "strategy_id": strategy, "symbol": symbol,
                    "data": {"timestamp": END + STEP, "open": 1.0, "high": 1.0, "low": 1.0, "close": 1.0,
                             "indicators": {"ema_fast": 1.0}}
                }),
            );
        }

        let updates_after: usize = s.render().all_series().map(|(_, r)| r.update_count).sum();
        assert_eq!(s.render().summary(), before);
        assert_eq!(updates_after, updates_before);
    }

    #[test]
    fn test_candle_update_touches_only_carried_series() {
        let mut s = session();
        load(&mut s, btc(), synthetic::fallback_schema(), Vec::new());
        push(
            &mut s,
            json!({
                "type": "candle_update", "strategy_id": "ttb", "symbol": "BTCUSDT",
                "data": {"timestamp": END + STEP, "open": 1.0, "high": 1.2, "low": 0.9, "close": 1.1,
                         "volume": 10.0, "indicators": {"osc": 55.0, "ema_fast": null}}
            }),
        );

        let assignment = s.view().chart.assignment();
        for series in &assignment.series {
            let record = s.render().series(series.handle).expect("live series");
            let expected = usize::from(series.spec.id == "osc" || series.spec.id == "volume");
            assert_eq!(record.update_count, expected, "series {}", series.spec.id);
        }
        let candles = s.render().series(assignment.candles.expect("candles")).expect("live");
        assert_eq!(candles.candles.last().map(|c| c.time), Some(END + STEP));
        assert_eq!(s.render().rejected_updates(), 0);
    }

    #[test]
    fn test_ping_patches_watchlist_only() {
        let mut s = session();
        s.handle(SessionEvent::InstrumentsLoaded(vec![Instrument {
            symbol: "BTCUSDT".into(),
            last_price: 40_000.0,
            strategies: vec![InstrumentStrategy {
                strategy_id: "ttb".into(),
                strategy_name: Some("Top Trend Breakout".into()),
                status: InstrumentStatus::Wait,
            }],
        }]));
        load(&mut s, btc(), synthetic::fallback_schema(), Vec::new());
        let before = s.render().summary();

        let commands = push(
            &mut s,
            json!({"type": "watchlist_ping", "symbol": "BTCUSDT", "price": 41_234.5, "timestamp": END}),
        );
        assert!(commands.is_empty());
        assert_eq!(s.render().summary(), before);
        let row = s.view().watchlist.row("BTCUSDT").expect("row");
        assert_eq!(row.last_price, Some(41_234.5));
        assert_eq!(row.updated_at, Some(END));
    }

    #[test]
    fn test_unknown_messages_are_ignored() {
        let mut s = session();
        load(&mut s, btc(), synthetic::fallback_schema(), Vec::new());
        let before = s.render().summary();
        push(&mut s, json!({"type": "strategy_log", "line": "hello"}));
        push(&mut s, json!({"type": "update", "event": "StrategySignalEvent", "data": {}}));
        push(&mut s, json!({"type": "update", "event": "PositionStateEvent", "data": {"side": 3}}));
        assert_eq!(s.render().summary(), before);
    }
}
