//! Bounded in-memory time series

use super::{SeriesKey, TimeSeriesSink};
use std::collections::{BTreeMap, VecDeque};

/// Keeps the most recent `capacity` points of every series
#[derive(Debug, Clone)]
pub struct TimeSeriesBuffer {
    capacity: usize,
    series: BTreeMap<SeriesKey, VecDeque<(u64, f64)>>,
    amplitude_span: f64,
}

impl TimeSeriesBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: BTreeMap::new(),
            amplitude_span: 0.0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn series(&self, key: SeriesKey) -> Option<&VecDeque<(u64, f64)>> {
        self.series.get(&key)
    }

    /// Copy of a series' points, oldest first
    pub fn points(&self, key: SeriesKey) -> Vec<(u64, f64)> {
        self.series
            .get(&key)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, key: SeriesKey) -> usize {
        self.series.get(&key).map_or(0, VecDeque::len)
    }

    pub fn keys(&self) -> impl Iterator<Item = SeriesKey> + '_ {
        self.series.keys().copied()
    }

    /// Most recent point of a series
    pub fn latest(&self, key: SeriesKey) -> Option<(u64, f64)> {
        self.series.get(&key).and_then(|s| s.back().copied())
    }

    pub fn remove_series(&mut self, key: SeriesKey) {
        self.series.remove(&key);
    }

    pub fn clear(&mut self) {
        self.series.clear();
    }

    pub fn amplitude_span(&self) -> f64 {
        self.amplitude_span
    }
}

impl TimeSeriesSink for TimeSeriesBuffer {
    fn append(&mut self, key: SeriesKey, index: u64, value: f64) {
        let series = self.series.entry(key).or_default();
        series.push_back((index, value));
        while series.len() > self.capacity {
            series.pop_front();
        }
    }

    fn set_amplitude_span(&mut self, span: f64) {
        self.amplitude_span = span;
    }
}
