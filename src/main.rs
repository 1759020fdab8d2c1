//! StratView headless runner
//!
//! Usage: stratview, then type commands on stdin:
//!   select <strategy> <symbol> | clear | watchlist | scene | quit

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::{wrappers::LinesStream, StreamExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stratview::backend::{Backend, HttpBackend};
use stratview::config::{AppConfig, LoggingConfig};
use stratview::driver::{Driver, DriverCommand, WsConnector};
use stratview::render::{RenderPort, SceneRecorder};
use stratview::session::{Session, SessionConfig};
use stratview::snapshot::SnapshotLoader;
use stratview::stream::StreamSettings;
use stratview::types::Selection;

type Command = DriverCommand<SceneRecorder>;

#[derive(Debug, PartialEq)]
enum Input {
    Select(Selection),
    Clear,
    Watchlist,
    Scene,
    Quit,
    Help,
}

fn parse_input(line: &str) -> Option<Input> {
    let mut parts = line.split_whitespace();
    let input = match parts.next()? {
        "select" | "s" => {
            let strategy = parts.next()?;
            let symbol = parts.next()?;
            Input::Select(Selection::new(strategy, symbol.to_uppercase()))
        }
        "clear" => Input::Clear,
        "watchlist" | "w" => Input::Watchlist,
        "scene" => Input::Scene,
        "quit" | "exit" | "q" => Input::Quit,
        _ => Input::Help,
    };
    Some(input)
}

fn init_tracing(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cfg.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn describe_scene(session: &mut Session<SceneRecorder>) -> String {
    let view = session.view();
    let selection = session
        .selection()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "selection={} epoch={} synthetic={} risk_lines={} markers={} {}",
        selection,
        session.epoch(),
        view.chart.is_synthetic(),
        view.chart.risk_line_count(),
        view.chart.marker_count(),
        session.render().summary()
    )
}

async fn send(tx: &mpsc::Sender<Command>, command: Command) -> Result<()> {
    tx.send(command)
        .await
        .map_err(|_| anyhow::anyhow!("driver stopped"))
}

/// Ask the driver for a text rendering of its state
async fn inspect(
    tx: &mpsc::Sender<Command>,
    f: fn(&mut Session<SceneRecorder>) -> String,
) -> Result<String> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let request = move |session: &mut Session<SceneRecorder>| {
        let _ = reply_tx.send(f(session));
    };
    send(tx, DriverCommand::Inspect(Box::new(request))).await?;
    reply_rx.await.context("driver dropped inspection")
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration and logging
    let config = AppConfig::load()?;
    init_tracing(&config.logging);
    info!(config = %config, "StratView starting");

    // 2. Backend, loader and stream connector
    let backend: Arc<dyn Backend> = Arc::new(
        HttpBackend::new(
            &config.backend.base_url,
            Duration::from_millis(config.backend.request_timeout_ms),
        )
        .context("Failed to build HTTP client")?,
    );
    let loader = SnapshotLoader::new(
        Arc::clone(&backend),
        &config.chart.resolution,
        config.chart.candle_limit,
        config.chart.fallback_candles,
    );
    let connector = Arc::new(WsConnector::new(
        &config.backend.ws_url,
        StreamSettings::from(&config.stream),
    ));

    // 3. Session driver
    let session = Session::new(SceneRecorder::new(), SessionConfig::from_app(&config));
    let driver = Driver::new(session, backend, loader, connector, config.stream.channel_capacity);
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(64);
    let driver_task = tokio::spawn(driver.run(cmd_rx));

    if let Some(selection) = config.selection.initial() {
        info!(selection = %selection, "Initial selection from config");
        send(&cmd_tx, DriverCommand::Select(selection)).await?;
    }

    // 4. Stdin command loop
    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    loop {
        tokio::select! {
            line = lines.next() => {
                let Some(line) = line else { break };
                let line = line.context("Failed to read stdin")?;
                let Some(input) = parse_input(&line) else { continue };
                match input {
                    Input::Select(selection) => send(&cmd_tx, DriverCommand::Select(selection)).await?,
                    Input::Clear => send(&cmd_tx, DriverCommand::Clear).await?,
                    Input::Watchlist => {
                        let table = inspect(&cmd_tx, |s| s.view().watchlist.render_table()).await?;
                        println!("{table}");
                    }
                    Input::Scene => println!("{}", inspect(&cmd_tx, describe_scene).await?),
                    Input::Quit => break,
                    Input::Help => println!("commands: select <strategy> <symbol> | clear | watchlist | scene | quit"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    // 5. Shutdown
    if send(&cmd_tx, DriverCommand::Shutdown).await.is_err() {
        warn!("Driver already stopped");
    }
    driver_task.await.context("Driver task panicked")??;
    Ok(())
}
