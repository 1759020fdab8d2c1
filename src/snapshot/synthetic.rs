//! Deterministic synthetic series for offline mode
//!
//! The same selection always yields the same candles, so the view is stable
//! across reloads while the backend is unreachable.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

use crate::types::{Candle, DisplayKind, IndicatorSchema, Selection};

/// Stable 64-bit FNV-1a over the selection
fn selection_seed(selection: &Selection) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in selection
        .strategy_id
        .bytes()
        .chain(std::iter::once(0))
        .chain(selection.symbol.bytes())
    {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Schema used when the strategy's own schema cannot be fetched
pub fn fallback_schema() -> IndicatorSchema {
    IndicatorSchema::from_value(&json!({
        "price": {
            "ema_fast": {"type": "line", "color": "#2962ff"},
            "ema_slow": {"type": "line", "color": "#ff6d00", "style": "dashed"}
        },
        "volume": {
            "volume": {"type": "histogram"}
        },
        "oscillator": {
            "osc": {"type": "line", "color": "#7e57c2"},
            "upper": {"value": 70.0, "style": "dotted"},
            "lower": {"value": 30.0, "style": "dotted"}
        }
    }))
}

/// Generate `count` candles ending at `end_time`, one every `step_secs`.
///
/// Every non-fixed indicator in `schema` gets synthetic values: moving
/// averages on the first pane (with a warm-up gap), a bounded oscillator on
/// other line panes, and the bar body for histograms.
pub fn fallback_candles(
    selection: &Selection,
    schema: &IndicatorSchema,
    count: usize,
    step_secs: i64,
    end_time: i64,
) -> Vec<Candle> {
    let seed = selection_seed(selection);
    let mut rng = StdRng::seed_from_u64(seed);

    // Spread base prices over several magnitudes so precision varies per symbol
    let magnitude = (seed % 8) as i32 - 3;
    let mut price = 10f64.powi(magnitude) * rng.gen_range(1.0..9.0);
    let step = step_secs.max(1);
    let start = end_time - step * (count as i64 - 1);

    let mut candles = Vec::with_capacity(count);
    for i in 0..count {
        let open = price;
        let close = open * (1.0 + rng.gen_range(-0.01..0.01));
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.005));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.005));
        let mut candle = Candle::new(start + step * i as i64, open, high, low, close);
        candle.volume = Some(rng.gen_range(100.0..10_000.0));
        candle.extra.insert("synthetic".to_string(), Value::Bool(true));
        candles.push(candle);
        price = close;
    }

    for (pane_index, pane) in schema.panes.iter().enumerate() {
        let mut line_no = 0usize;
        for spec in &pane.indicators {
            match spec.kind {
                DisplayKind::HorizontalLine => {}
                DisplayKind::Histogram => {
                    if spec.id == "volume" {
                        continue;
                    }
                    for c in candles.iter_mut() {
                        let v = c.close - c.open;
                        c.indicators.insert(spec.id.clone(), v);
                    }
                }
                DisplayKind::Line if pane_index == 0 => {
                    let period = 10 + 10 * line_no;
                    line_no += 1;
                    let alpha = 2.0 / (period as f64 + 1.0);
                    let mut ema = candles.first().map(|c| c.close).unwrap_or(0.0);
                    for (i, c) in candles.iter_mut().enumerate() {
                        ema = alpha * c.close + (1.0 - alpha) * ema;
                        if i + 1 >= period {
                            c.indicators.insert(spec.id.clone(), ema);
                        }
                    }
                }
                DisplayKind::Line => {
                    let phase = line_no as f64;
                    line_no += 1;
                    for (i, c) in candles.iter_mut().enumerate() {
                        let v = 50.0 + 40.0 * ((i as f64) / 8.0 + phase).sin();
                        c.indicators.insert(spec.id.clone(), v);
                    }
                }
            }
        }
    }

    candles
}
