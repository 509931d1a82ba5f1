//! Rolling telemetry storage: one fixed-capacity ring buffer per metric.
//!
//! Every [`MetricSeries`] is pre-filled at construction so there is always a
//! "latest" value to show, even before the first sensor read.
//!
//! ## Rust concepts
//! - `enum` with `const fn` accessors for static per-variant metadata
//! - `FromStr` / `Display` for round-tripping names through config and HTTP
//! - Returning `Result` from lookups instead of panicking on bad keys

use crate::error::StoreError;
use ringbuffer::{AllocRingBuffer, RingBuffer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Metric kinds ─────────────────────────────────────────────────────

/// The metrics the store knows how to track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Temperature,
    Pressure,
    Humidity,
    /// Extended metric; not present on the Sense HAT itself.
    Light,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Temperature,
        MetricKind::Pressure,
        MetricKind::Humidity,
        MetricKind::Light,
    ];

    /// The metrics a Sense HAT provides.
    pub const SENSE_HAT: [MetricKind; 3] = [
        MetricKind::Temperature,
        MetricKind::Pressure,
        MetricKind::Humidity,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            MetricKind::Temperature => "temperature",
            MetricKind::Pressure => "pressure",
            MetricKind::Humidity => "humidity",
            MetricKind::Light => "light",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            MetricKind::Temperature => "Temperature",
            MetricKind::Pressure => "Pressure",
            MetricKind::Humidity => "Humidity",
            MetricKind::Light => "Light",
        }
    }

    pub const fn unit(self) -> &'static str {
        match self {
            MetricKind::Temperature => "C",
            MetricKind::Pressure => "hPa",
            MetricKind::Humidity => "%",
            MetricKind::Light => "Lux",
        }
    }

    /// Hardware measuring range, used both for color mapping and for
    /// generating synthetic readings.
    pub const fn limits(self) -> (f64, f64) {
        match self {
            MetricKind::Temperature => (0.0, 65.0),
            MetricKind::Pressure => (260.0, 1260.0),
            MetricKind::Humidity => (0.0, 100.0),
            MetricKind::Light => (0.01, 64000.0),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| StoreError::UnknownMetric(s.to_string()))
    }
}

// ── Temperature units ────────────────────────────────────────────────

/// Display unit for temperatures. Samples are always stored in Celsius.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub enum TemperatureUnit {
    #[default]
    C,
    F,
    K,
}

impl TemperatureUnit {
    pub fn convert(self, celsius: f64) -> f64 {
        match self {
            TemperatureUnit::C => celsius,
            TemperatureUnit::F => celsius * 9.0 / 5.0 + 32.0,
            TemperatureUnit::K => celsius + 273.15,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            TemperatureUnit::C => "C",
            TemperatureUnit::F => "F",
            TemperatureUnit::K => "K",
        }
    }
}

// ── MetricSeries ─────────────────────────────────────────────────────

/// Fixed-capacity rolling buffer for one metric plus its display metadata.
pub struct MetricSeries {
    kind: MetricKind,
    label: String,
    unit: String,
    limits: (f64, f64),
    buffer: AllocRingBuffer<f64>,
}

impl MetricSeries {
    /// Create a series holding `capacity` copies of `default`.
    ///
    /// A zero capacity is bumped to 1 so the buffer can never be empty.
    pub fn new(kind: MetricKind, capacity: usize, default: f64) -> Self {
        let capacity = capacity.max(1);
        let mut buffer = AllocRingBuffer::new(capacity);
        for _ in 0..capacity {
            buffer.push(default);
        }

        Self {
            kind,
            label: kind.label().to_string(),
            unit: kind.unit().to_string(),
            limits: kind.limits(),
            buffer,
        }
    }

    /// Override the color-mapping range, e.g. for a narrower indoor range.
    pub fn with_limits(mut self, min: f64, max: f64) -> Self {
        self.limits = if min <= max { (min, max) } else { (max, min) };
        self
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn limits(&self) -> (f64, f64) {
        self.limits
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Append a sample, evicting the oldest one when full.
    pub fn add(&mut self, value: f64) {
        self.buffer.push(value);
    }

    pub fn latest(&self) -> Result<f64, StoreError> {
        self.buffer
            .back()
            .copied()
            .ok_or(StoreError::EmptyBuffer(self.kind))
    }

    /// Oldest-first copy of the buffer.
    pub fn history(&self) -> Vec<f64> {
        self.buffer.to_vec()
    }

    /// The newest `n` samples, oldest first.
    pub fn tail(&self, n: usize) -> Vec<f64> {
        let skip = self.buffer.len().saturating_sub(n);
        self.buffer.iter().skip(skip).copied().collect()
    }

    /// Clamp `value` into the limits and scale it to `0.0..=1.0`.
    pub fn normalized(&self, value: f64) -> f64 {
        let (min, max) = self.limits;
        let span = max - min;
        if span <= 0.0 || value.is_nan() {
            return 0.0;
        }
        (value.clamp(min, max) - min) / span
    }
}

// ── SensorDataStore ──────────────────────────────────────────────────

/// One [`MetricSeries`] per tracked metric, in registration order.
///
/// The metric set is fixed at construction.
pub struct SensorDataStore {
    series: Vec<MetricSeries>,
}

impl SensorDataStore {
    /// Build a store tracking `kinds` (duplicates are ignored).
    pub fn new(kinds: &[MetricKind], capacity: usize, default: f64) -> Self {
        let mut series: Vec<MetricSeries> = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            if series.iter().all(|s| s.kind != kind) {
                series.push(MetricSeries::new(kind, capacity, default));
            }
        }
        Self { series }
    }

    /// The three metrics a Sense HAT measures.
    pub fn sense_hat(capacity: usize, default: f64) -> Self {
        Self::new(&MetricKind::SENSE_HAT, capacity, default)
    }

    pub fn kinds(&self) -> Vec<MetricKind> {
        self.series.iter().map(MetricSeries::kind).collect()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricSeries> {
        self.series.iter()
    }

    /// Look up a series by its metric name (e.g. `"humidity"`).
    pub fn get(&self, name: &str) -> Result<&MetricSeries, StoreError> {
        let kind: MetricKind = name.parse()?;
        self.get_kind(kind)
            .map_err(|_| StoreError::UnknownMetric(name.to_string()))
    }

    pub fn get_kind(&self, kind: MetricKind) -> Result<&MetricSeries, StoreError> {
        self.series
            .iter()
            .find(|s| s.kind == kind)
            .ok_or_else(|| StoreError::UnknownMetric(kind.name().to_string()))
    }

    pub fn add(&mut self, kind: MetricKind, value: f64) -> Result<(), StoreError> {
        self.series
            .iter_mut()
            .find(|s| s.kind == kind)
            .ok_or_else(|| StoreError::UnknownMetric(kind.name().to_string()))?
            .add(value);
        Ok(())
    }

    pub fn latest(&self, name: &str) -> Result<f64, StoreError> {
        self.get(name)?.latest()
    }

    pub fn history(&self, name: &str) -> Result<Vec<f64>, StoreError> {
        Ok(self.get(name)?.history())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
