//! Settings file (`settings.toml`) and CLI overrides.
//!
//! Keys are upper-case to match the settings files the device has always
//! used. Every key is optional; missing keys fall back to the defaults below.
//!
//! ```toml
//! ROTATION = 90     # 0, 90, 180 or 270
//! DISPLAY = 0       # 0 = sensor readout, 1 = upload progress
//! PROGRESS = 1      # 1 = progress page and bar available
//! SLEEP = 600       # seconds of inactivity before blanking; 0 = never
//! WAIT = 1          # seconds between loop iterations
//! DELAY = 300       # seconds before the first upload
//! FREQ = 600        # seconds between uploads
//! CAPACITY = 120    # samples kept per metric
//! METRICS = ["temperature", "pressure", "humidity"]
//! TEMP_UNIT = "C"   # C, F or K
//! ```

use crate::GRID_SIZE;
use crate::display::{ControllerConfig, DisplayMode, Rotation};
use crate::error::ConfigError;
use crate::metrics::{MetricKind, TemperatureUnit};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SLEEP_SECS: i64 = 600;
pub const DEFAULT_WAIT_SECS: f64 = 1.0;
pub const DEFAULT_DELAY_SECS: u64 = 300;
pub const DEFAULT_FREQ_SECS: u64 = 600;
pub const DEFAULT_CAPACITY: usize = 120;

/// Loop iterations never run faster than this.
const MIN_WAIT: Duration = Duration::from_millis(50);

/// Longest accepted `WAIT`, `DELAY` or `FREQ`: one day.
pub const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;

fn check_interval(key: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs > MAX_INTERVAL_SECS {
        return Err(ConfigError::OutOfRange {
            key,
            value: secs as f64,
            max: MAX_INTERVAL_SECS,
        });
    }
    Ok(Duration::from_secs(secs))
}

/// Raw contents of `settings.toml`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    #[serde(rename = "ROTATION")]
    pub rotation: u16,
    #[serde(rename = "DISPLAY")]
    pub display: usize,
    #[serde(rename = "PROGRESS")]
    pub progress: u8,
    #[serde(rename = "SLEEP")]
    pub sleep: i64,
    #[serde(rename = "WAIT")]
    pub wait: f64,
    #[serde(rename = "DELAY")]
    pub delay: u64,
    #[serde(rename = "FREQ")]
    pub freq: u64,
    #[serde(rename = "CAPACITY")]
    pub capacity: usize,
    #[serde(rename = "METRICS")]
    pub metrics: Vec<String>,
    #[serde(rename = "TEMP_UNIT")]
    pub temp_unit: TemperatureUnit,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rotation: 0,
            display: 0,
            progress: 1,
            sleep: DEFAULT_SLEEP_SECS,
            wait: DEFAULT_WAIT_SECS,
            delay: DEFAULT_DELAY_SECS,
            freq: DEFAULT_FREQ_SECS,
            capacity: DEFAULT_CAPACITY,
            metrics: MetricKind::SENSE_HAT
                .iter()
                .map(|k| k.name().to_string())
                .collect(),
            temp_unit: TemperatureUnit::C,
        }
    }
}

impl Settings {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read settings from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Like [`Settings::load`], but a missing file means defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!("No settings at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

/// Command-line controls that take precedence over the settings file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overrides {
    /// Stop after this many uploads.
    pub uploads: Option<u32>,
    /// Force the progress page/bar on.
    pub progress: bool,
    /// Start with the display powered off.
    pub no_led: bool,
    /// Seconds between loop iterations.
    pub wait: Option<f64>,
}

/// Validated runtime configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub controller: ControllerConfig,
    pub metrics: Vec<MetricKind>,
    pub capacity: usize,
    /// `<= 0` disables sleep.
    pub sleep_secs: i64,
    pub wait: Duration,
    pub upload_delay: Duration,
    pub upload_frequency: Duration,
    pub upload_limit: Option<u32>,
    pub temp_unit: TemperatureUnit,
}

impl AppConfig {
    pub fn from_settings(settings: &Settings, overrides: &Overrides) -> Result<Self, ConfigError> {
        let rotation =
            Rotation::try_from(settings.rotation).map_err(ConfigError::InvalidRotation)?;
        let initial_mode = DisplayMode::from_index(settings.display)
            .ok_or(ConfigError::InvalidDisplayMode(settings.display))?;

        if settings.capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }

        let mut metrics = Vec::with_capacity(settings.metrics.len());
        for name in &settings.metrics {
            let kind: MetricKind = name
                .parse()
                .map_err(|_| ConfigError::UnknownMetric(name.clone()))?;
            if !metrics.contains(&kind) {
                metrics.push(kind);
            }
        }
        if metrics.is_empty() {
            return Err(ConfigError::NoMetrics);
        }

        let wait_secs = overrides.wait.unwrap_or(settings.wait);
        if wait_secs > MAX_INTERVAL_SECS as f64 {
            return Err(ConfigError::OutOfRange {
                key: "WAIT",
                value: wait_secs,
                max: MAX_INTERVAL_SECS,
            });
        }
        let wait = Duration::try_from_secs_f64(wait_secs)
            .unwrap_or(MIN_WAIT)
            .max(MIN_WAIT);
        let upload_delay = check_interval("DELAY", settings.delay)?;
        let upload_frequency = check_interval("FREQ", settings.freq.max(1))?;

        Ok(Self {
            controller: ControllerConfig {
                rotation,
                initial_mode,
                progress: settings.progress != 0 || overrides.progress,
                powered: !overrides.no_led,
                grid_size: GRID_SIZE,
            },
            metrics,
            capacity: settings.capacity,
            sleep_secs: settings.sleep,
            wait,
            upload_delay,
            upload_frequency,
            upload_limit: overrides.uploads.filter(|&n| n > 0),
            temp_unit: settings.temp_unit,
        })
    }
}
