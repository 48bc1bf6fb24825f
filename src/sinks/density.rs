//! Square density grid ("color map")

use super::DensitySink;
use crate::config::{MAX_DENSITY_BINS, MIN_DENSITY_BINS};

/// `bins × bins` grid of scalar cells over an X/Y voltage plane
#[derive(Debug, Clone)]
pub struct DensityGrid {
    bins: usize,
    cells: Vec<f64>,
    x_range: (f64, f64),
    y_range: (f64, f64),
    /// Grey-scale span mapped onto the cells
    data_range: (f64, f64),
    background: f64,
}

impl DensityGrid {
    /// Grid with `bins` cells per side, clamped to the supported range
    pub fn new(bins: usize) -> Self {
        let bins = bins.clamp(MIN_DENSITY_BINS, MAX_DENSITY_BINS);
        Self {
            bins,
            cells: vec![0.0; bins * bins],
            x_range: (-1.0, 1.0),
            y_range: (-1.0, 1.0),
            data_range: (-1.0, 1.0),
            background: 0.0,
        }
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn x_range(&self) -> (f64, f64) {
        self.x_range
    }

    pub fn y_range(&self) -> (f64, f64) {
        self.y_range
    }

    pub fn data_range(&self) -> (f64, f64) {
        self.data_range
    }

    pub fn cell(&self, column: usize, row: usize) -> Option<f64> {
        if column < self.bins && row < self.bins {
            self.cells.get(row * self.bins + column).copied()
        } else {
            None
        }
    }

    /// Set every cell to `value`
    pub fn fill(&mut self, value: f64) {
        self.cells.iter_mut().for_each(|c| *c = value);
    }

    /// Derive the grey-scale range from two selected amplitudes
    ///
    /// The offset is the midpoint of the pair and the amplitude half their
    /// distance; the grid is refilled with the offset. Returns
    /// `(offset, amplitude)`.
    pub fn set_data_range_from_selection(&mut self, first: f64, second: f64) -> (f64, f64) {
        let amplitude = (first - second).abs() / 2.0;
        let offset = first.min(second) + amplitude;
        self.data_range = (offset - amplitude, offset + amplitude);
        self.background = offset;
        self.fill(offset);
        (offset, amplitude)
    }

    fn axis_bin(&self, value: f64, (lo, hi): (f64, f64)) -> Option<usize> {
        if !(hi > lo) || !value.is_finite() || value < lo || value > hi {
            return None;
        }
        let scaled = (value - lo) / (hi - lo) * (self.bins - 1) as f64;
        Some((scaled.round() as usize).min(self.bins - 1))
    }
}

impl Default for DensityGrid {
    fn default() -> Self {
        Self::new(200)
    }
}

impl DensitySink for DensityGrid {
    fn coord_to_cell(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        Some((self.axis_bin(x, self.x_range)?, self.axis_bin(y, self.y_range)?))
    }

    fn set_cell(&mut self, (column, row): (usize, usize), value: f64) {
        if column < self.bins && row < self.bins {
            self.cells[row * self.bins + column] = value;
        }
    }

    fn resize(&mut self, bins: usize) {
        let bins = bins.clamp(MIN_DENSITY_BINS, MAX_DENSITY_BINS);
        if bins != self.bins {
            tracing::debug!("Density grid resized from {} to {} bins", self.bins, bins);
        }
        self.bins = bins;
        self.cells = vec![self.background; bins * bins];
    }

    fn set_axis_ranges(&mut self, x: (f64, f64), y: (f64, f64)) {
        self.x_range = x;
        self.y_range = y;
    }
}
