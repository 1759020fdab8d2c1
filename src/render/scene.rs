//! In-memory scene surface
//!
//! Records what a chart widget would display. Operations that a real chart
//! library rejects (out-of-order updates, unsorted markers) are counted
//! instead of applied so callers can assert they never happen.

use std::collections::BTreeMap;
use tracing::debug;

use super::{
    Marker, PriceFormat, PriceLineHandle, PriceLineOptions, RenderPort, SeriesHandle,
    SeriesOptions, SeriesPoint,
};
use crate::types::Candle;

/// One series as currently displayed
#[derive(Debug, Clone)]
pub struct RecordedSeries {
    pub options: SeriesOptions,
    pub candles: Vec<Candle>,
    pub points: Vec<SeriesPoint>,
    pub price_lines: BTreeMap<PriceLineHandle, PriceLineOptions>,
    pub markers: Vec<Marker>,
    /// In-place updates received (not bulk loads)
    pub update_count: usize,
}

#[derive(Debug, Default)]
pub struct SceneRecorder {
    next_id: u64,
    series: BTreeMap<SeriesHandle, RecordedSeries>,
    price_format: Option<PriceFormat>,
    visible_range: Option<(i64, i64)>,
    fit_count: usize,
    allocated_total: usize,
    released_total: usize,
    rejected_updates: usize,
    unordered_marker_sets: usize,
}

impl SceneRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Series currently alive on the surface
    pub fn live_series(&self) -> usize {
        self.series.len()
    }

    pub fn allocated_total(&self) -> usize {
        self.allocated_total
    }

    pub fn released_total(&self) -> usize {
        self.released_total
    }

    pub fn series(&self, handle: SeriesHandle) -> Option<&RecordedSeries> {
        self.series.get(&handle)
    }

    pub fn all_series(&self) -> impl Iterator<Item = (&SeriesHandle, &RecordedSeries)> {
        self.series.iter()
    }

    /// Price lines across every live series
    pub fn price_line_count(&self) -> usize {
        self.series.values().map(|s| s.price_lines.len()).sum()
    }

    /// Titles of all live price lines, sorted
    pub fn price_line_titles(&self) -> Vec<String> {
        let mut titles: Vec<String> = self
            .series
            .values()
            .flat_map(|s| s.price_lines.values().map(|l| l.title.clone()))
            .collect();
        titles.sort();
        titles
    }

    pub fn markers(&self, handle: SeriesHandle) -> &[Marker] {
        self.series
            .get(&handle)
            .map(|s| s.markers.as_slice())
            .unwrap_or(&[])
    }

    pub fn price_format(&self) -> Option<PriceFormat> {
        self.price_format
    }

    pub fn fit_count(&self) -> usize {
        self.fit_count
    }

    /// Simulates the user scrolling or zooming the time axis
    pub fn set_visible_range(&mut self, from: i64, to: i64) {
        self.visible_range = Some((from, to));
    }

    pub fn visible_range(&self) -> Option<(i64, i64)> {
        self.visible_range
    }

    /// Updates dropped because they were older than the last bar
    pub fn rejected_updates(&self) -> usize {
        self.rejected_updates
    }

    /// Marker sets committed out of time order
    pub fn unordered_marker_sets(&self) -> usize {
        self.unordered_marker_sets
    }

    fn data_range(&self) -> Option<(i64, i64)> {
        let times = self.series.values().flat_map(|s| {
            s.candles
                .iter()
                .map(|c| c.time)
                .chain(s.points.iter().map(|p| p.time))
        });
        times.fold(None, |acc, t| match acc {
            None => Some((t, t)),
            Some((lo, hi)) => Some((lo.min(t), hi.max(t))),
        })
    }
}

impl RenderPort for SceneRecorder {
    fn add_series(&mut self, options: SeriesOptions) -> SeriesHandle {
        let handle = SeriesHandle(self.next_id());
        self.series.insert(
            handle,
            RecordedSeries {
                options,
                candles: Vec::new(),
                points: Vec::new(),
                price_lines: BTreeMap::new(),
                markers: Vec::new(),
                update_count: 0,
            },
        );
        self.allocated_total += 1;
        handle
    }

    fn remove_series(&mut self, series: SeriesHandle) {
        if self.series.remove(&series).is_some() {
            self.released_total += 1;
        } else {
            debug!(?series, "remove_series on unknown handle");
        }
    }

    fn set_candles(&mut self, series: SeriesHandle, candles: &[Candle]) {
        if let Some(s) = self.series.get_mut(&series) {
            s.candles = candles.to_vec();
        }
    }

    fn update_candle(&mut self, series: SeriesHandle, candle: &Candle) {
        let Some(s) = self.series.get_mut(&series) else {
            return;
        };
        match s.candles.last().map(|c| c.time) {
            Some(last) if candle.time < last => {
                self.rejected_updates += 1;
                return;
            }
            Some(last) if candle.time == last => {
                if let Some(bar) = s.candles.last_mut() {
                    *bar = candle.clone();
                }
            }
            _ => s.candles.push(candle.clone()),
        }
        s.update_count += 1;
    }

    fn set_points(&mut self, series: SeriesHandle, points: Vec<SeriesPoint>) {
        if let Some(s) = self.series.get_mut(&series) {
            s.points = points;
        }
    }

    fn update_point(&mut self, series: SeriesHandle, point: SeriesPoint) {
        let Some(s) = self.series.get_mut(&series) else {
            return;
        };
        match s.points.last().map(|p| p.time) {
            Some(last) if point.time < last => {
                self.rejected_updates += 1;
                return;
            }
            Some(last) if point.time == last => {
                if let Some(p) = s.points.last_mut() {
                    *p = point;
                }
            }
            _ => s.points.push(point),
        }
        s.update_count += 1;
    }

    fn create_price_line(
        &mut self,
        series: SeriesHandle,
        options: PriceLineOptions,
    ) -> PriceLineHandle {
        let handle = PriceLineHandle(self.next_id());
        if let Some(s) = self.series.get_mut(&series) {
            s.price_lines.insert(handle, options);
        }
        handle
    }

    fn remove_price_line(&mut self, series: SeriesHandle, line: PriceLineHandle) {
        if let Some(s) = self.series.get_mut(&series) {
            s.price_lines.remove(&line);
        }
    }

    fn set_markers(&mut self, series: SeriesHandle, markers: Vec<Marker>) {
        if markers.windows(2).any(|w| w[0].time > w[1].time) {
            self.unordered_marker_sets += 1;
        }
        if let Some(s) = self.series.get_mut(&series) {
            s.markers = markers;
        }
    }

    fn set_price_format(&mut self, format: PriceFormat) {
        self.price_format = Some(format);
    }

    fn fit_content(&mut self) {
        self.fit_count += 1;
        self.visible_range = self.data_range();
    }

    fn summary(&self) -> String {
        let bars = self
            .series
            .values()
            .map(|s| s.candles.len())
            .max()
            .unwrap_or(0);
        let markers: usize = self.series.values().map(|s| s.markers.len()).sum();
        format!(
            "series={} bars={} price_lines={} markers={} precision={}",
            self.live_series(),
            bars,
            self.price_line_count(),
            markers,
            self.price_format.map(|f| f.precision).unwrap_or(0)
        )
    }
}
