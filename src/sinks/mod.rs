//! Tick consumers
//!
//! The [`SinkRouter`] fans every [`SampleTick`] out to a time-series sink and
//! a 2D density sink. The sinks are traits so a display layer can plug in its
//! own views; [`TimeSeriesBuffer`] and [`DensityGrid`] are the in-memory
//! implementations used by the headless runner. [`TickExporter`] writes ticks
//! to a tab-separated log.

pub mod density;
pub mod exporter;
pub mod time_series;

pub use density::DensityGrid;
pub use exporter::TickExporter;
pub use time_series::TimeSeriesBuffer;

use crate::backend::ChannelModel;
use crate::types::{ExpressionId, Role, SampleTick, VoltageRange};
use serde::{Deserialize, Serialize};

/// Identifies one series in the time-series sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SeriesKey {
    Role(Role),
    Expression(ExpressionId),
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeriesKey::Role(role) => write!(f, "{}", role),
            SeriesKey::Expression(id) => write!(f, "{}", id),
        }
    }
}

/// Value written into the density cell of each tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DensitySource {
    Fixed(f64),
    Role(Role),
    Expression(ExpressionId),
}

impl Default for DensitySource {
    fn default() -> Self {
        DensitySource::Role(Role::Z0)
    }
}

impl DensitySource {
    /// This source's value in `tick`
    pub fn value(&self, tick: &SampleTick) -> Option<f64> {
        match *self {
            DensitySource::Fixed(v) => Some(v),
            DensitySource::Role(role) => tick.role(role),
            DensitySource::Expression(id) => tick.derived_value(id),
        }
    }
}

/// Accepts `(index, value)` points per named series
#[cfg_attr(test, mockall::automock)]
pub trait TimeSeriesSink {
    fn append(&mut self, key: SeriesKey, index: u64, value: f64);

    /// Vertical span of the auxiliary channels, in volts either side of zero
    fn set_amplitude_span(&mut self, span: f64);
}

/// Square grid of scalar cells addressed by `(x, y)` coordinates
#[cfg_attr(test, mockall::automock)]
pub trait DensitySink {
    /// Cell `(column, row)` for a coordinate, `None` when outside the axes
    fn coord_to_cell(&self, x: f64, y: f64) -> Option<(usize, usize)>;

    fn set_cell(&mut self, cell: (usize, usize), value: f64);

    /// Change the number of cells per side
    fn resize(&mut self, bins: usize);

    fn set_axis_ranges(&mut self, x: (f64, f64), y: (f64, f64));
}

/// Delivers ticks to the display sinks
#[derive(Debug)]
pub struct SinkRouter<T, D> {
    time_series: T,
    density: D,
    source: DensitySource,
}

impl<T: TimeSeriesSink, D: DensitySink> SinkRouter<T, D> {
    pub fn new(time_series: T, density: D, source: DensitySource) -> Self {
        Self {
            time_series,
            density,
            source,
        }
    }

    /// Route one tick
    ///
    /// Every populated role slot and every derived value becomes a point at
    /// abscissa `tick.index`. When both axes are populated and land on the
    /// grid, the density source's value is written into that cell.
    pub fn route(&mut self, tick: &SampleTick) {
        for (role, value) in tick.populated_roles() {
            self.time_series
                .append(SeriesKey::Role(role), tick.index, value);
        }
        for derived in &tick.derived {
            self.time_series
                .append(SeriesKey::Expression(derived.id), tick.index, derived.value);
        }

        let (Some(x), Some(y)) = (tick.role(Role::X), tick.role(Role::Y)) else {
            return;
        };
        let Some(cell) = self.density.coord_to_cell(x, y) else {
            return;
        };
        if let Some(value) = self.source.value(tick).filter(|v| v.is_finite()) {
            self.density.set_cell(cell, value);
        }
    }

    pub fn route_all<'a>(&mut self, ticks: impl IntoIterator<Item = &'a SampleTick>) {
        for tick in ticks {
            self.route(tick);
        }
    }

    pub fn density_source(&self) -> DensitySource {
        self.source
    }

    pub fn select_density_source(&mut self, source: DensitySource) {
        tracing::debug!("Density source set to {:?}", source);
        self.source = source;
    }

    pub fn resize_density(&mut self, bins: usize) {
        self.density.resize(bins);
    }

    /// Size both views from the channel model
    ///
    /// The density axes span ± full scale of the X and Y channels; the
    /// time-series span is the largest full scale among auxiliary channels.
    pub fn configure_axes(&mut self, model: &ChannelModel) {
        let fallback = VoltageRange::default().full_scale();
        let x = model.role_full_scale(Role::X).unwrap_or(fallback);
        let y = model.role_full_scale(Role::Y).unwrap_or(fallback);
        self.density.set_axis_ranges((-x, x), (-y, y));
        self.time_series
            .set_amplitude_span(model.auxiliary_full_scale());
    }

    pub fn time_series(&self) -> &T {
        &self.time_series
    }

    pub fn density(&self) -> &D {
        &self.density
    }

    pub fn density_mut(&mut self) -> &mut D {
        &mut self.density
    }

    pub fn into_parts(self) -> (T, D) {
        (self.time_series, self.density)
    }
}
