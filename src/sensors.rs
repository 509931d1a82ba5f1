//! Sensor sources: real Sense HAT sensors through Linux IIO, or synthetic
//! readings when the hardware is missing.
//!
//! The Sense HAT's HTS221 (humidity/temperature) and LPS25H
//! (pressure/temperature) have mainline IIO drivers, so their readings are
//! plain sysfs files such as
//! `/sys/bus/iio/devices/iio:device0/in_humidityrelative_raw`.

use crate::error::SensorError;
use crate::metrics::MetricKind;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Anything that can produce one reading per metric.
pub trait SensorSource {
    fn read(&mut self, metric: MetricKind) -> Result<f64, SensorError>;

    /// Short description for startup logs.
    fn describe(&self) -> String;

    fn read_temperature(&mut self) -> Result<f64, SensorError> {
        self.read(MetricKind::Temperature)
    }

    fn read_pressure(&mut self) -> Result<f64, SensorError> {
        self.read(MetricKind::Pressure)
    }

    fn read_humidity(&mut self) -> Result<f64, SensorError> {
        self.read(MetricKind::Humidity)
    }
}

impl<S: SensorSource + ?Sized> SensorSource for Box<S> {
    fn read(&mut self, metric: MetricKind) -> Result<f64, SensorError> {
        (**self).read(metric)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

// ── Synthetic readings ───────────────────────────────────────────────

/// Pseudo-random readings within each metric's hardware range, in 0.1 steps.
///
/// Uses a xorshift generator; it only needs to look plausible on an LED.
pub struct SyntheticSensorSource {
    state: u64,
}

impl SyntheticSensorSource {
    pub fn new(seed: u64) -> Self {
        // xorshift must never be seeded with zero
        Self {
            state: seed | 1,
        }
    }

    /// Seed from the wall clock.
    pub fn from_clock() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E37_79B9_7F4A_7C15);
        Self::new(seed)
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// A reading for `metric`; never fails.
    pub fn sample(&mut self, metric: MetricKind) -> f64 {
        let (min, max) = metric.limits();
        let lo = (min * 10.0).round() as i64;
        let hi = (max * 10.0).round() as i64;
        let steps = (hi - lo).max(0) as u64 + 1;
        let tenth = lo + (self.next_u64() % steps) as i64;
        tenth as f64 / 10.0
    }
}

impl SensorSource for SyntheticSensorSource {
    fn read(&mut self, metric: MetricKind) -> Result<f64, SensorError> {
        Ok(self.sample(metric))
    }

    fn describe(&self) -> String {
        "synthetic (random demo data)".to_string()
    }
}

// ── IIO sysfs sensors ────────────────────────────────────────────────

/// Where one metric lives in sysfs and how to turn it into display units.
#[derive(Clone, Debug, PartialEq)]
struct IioChannel {
    device: PathBuf,
    channel: &'static str,
    /// Multiplier from the IIO unit to ours (milli-degrees → C, kPa → hPa, ...).
    factor: f64,
}

impl IioChannel {
    fn for_metric(device: &Path, metric: MetricKind) -> Option<Self> {
        let (channel, factor) = match metric {
            MetricKind::Temperature => ("temp", 0.001),
            MetricKind::Pressure => ("pressure", 10.0),
            MetricKind::Humidity => ("humidityrelative", 0.001),
            MetricKind::Light => ("illuminance", 1.0),
        };
        let has_input = device.join(format!("in_{channel}_input")).is_file();
        let has_raw = device.join(format!("in_{channel}_raw")).is_file();
        (has_input || has_raw).then(|| Self {
            device: device.to_path_buf(),
            channel,
            factor,
        })
    }

    /// `in_X_input` if present, else `(in_X_raw + in_X_offset) * in_X_scale`.
    fn read(&self) -> Result<f64, String> {
        let input = self.device.join(format!("in_{}_input", self.channel));
        if input.is_file() {
            return read_number(&input).map(|v| v * self.factor);
        }

        let raw = read_number(&self.device.join(format!("in_{}_raw", self.channel)))?;
        let offset = self.optional(&format!("in_{}_offset", self.channel), 0.0)?;
        let scale = self.optional(&format!("in_{}_scale", self.channel), 1.0)?;
        Ok((raw + offset) * scale * self.factor)
    }

    fn optional(&self, file: &str, default: f64) -> Result<f64, String> {
        let path = self.device.join(file);
        if path.is_file() {
            read_number(&path)
        } else {
            Ok(default)
        }
    }
}

fn read_number(path: &Path) -> Result<f64, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    text.trim()
        .parse::<f64>()
        .map_err(|e| format!("{}: {e}", path.display()))
}

/// Sensors read from `<sysfs>/bus/iio/devices/iio:device*`.
pub struct IioSensorSource {
    channels: HashMap<MetricKind, IioChannel>,
}

impl IioSensorSource {
    /// Scan IIO devices for the requested metrics. The first device (in
    /// name order) offering a channel wins. Returns `None` when no metric
    /// could be found at all.
    pub fn discover(sysfs: &Path, metrics: &[MetricKind]) -> Option<Self> {
        let devices_dir = sysfs.join("bus").join("iio").join("devices");
        let mut devices: Vec<PathBuf> = fs::read_dir(&devices_dir)
            .ok()?
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("iio:device"))
            })
            .collect();
        devices.sort();

        let mut channels = HashMap::new();
        for &metric in metrics {
            if let Some(channel) = devices
                .iter()
                .find_map(|device| IioChannel::for_metric(device, metric))
            {
                channels.insert(metric, channel);
            }
        }

        if channels.is_empty() {
            None
        } else {
            Some(Self { channels })
        }
    }

    pub fn supports(&self, metric: MetricKind) -> bool {
        self.channels.contains_key(&metric)
    }
}

impl SensorSource for IioSensorSource {
    fn read(&mut self, metric: MetricKind) -> Result<f64, SensorError> {
        let channel = self
            .channels
            .get(&metric)
            .ok_or_else(|| SensorError::unavailable(metric, "no IIO channel"))?;
        channel
            .read()
            .map_err(|reason| SensorError::unavailable(metric, reason))
    }

    fn describe(&self) -> String {
        let mut found: Vec<&str> = self.channels.keys().map(|k| k.name()).collect();
        found.sort();
        format!("IIO sysfs ({})", found.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    /// Lay out a fake sysfs tree with an HTS221 and an LPS25H.
    fn sense_hat_sysfs() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let devices = tmp.path().join("bus").join("iio").join("devices");

        let hts221 = devices.join("iio:device0");
        std::fs::create_dir_all(&hts221).unwrap();
        write(&hts221, "name", "hts221\n");
        write(&hts221, "in_humidityrelative_raw", "-2000\n");
        write(&hts221, "in_humidityrelative_offset", "9000\n");
        write(&hts221, "in_humidityrelative_scale", "5.0\n");
        write(&hts221, "in_temp_raw", "300\n");
        write(&hts221, "in_temp_offset", "2000\n");
        write(&hts221, "in_temp_scale", "10.0\n");

        let lps25h = devices.join("iio:device1");
        std::fs::create_dir_all(&lps25h).unwrap();
        write(&lps25h, "name", "lps25h\n");
        write(&lps25h, "in_pressure_input", "101.325\n");
        write(&lps25h, "in_temp_input", "19000\n");

        tmp
    }

    #[test]
    fn synthetic_readings_stay_in_range() {
        let mut source = SyntheticSensorSource::new(42);
        for metric in MetricKind::ALL {
            let (min, max) = metric.limits();
            for _ in 0..200 {
                let v = source.read(metric).unwrap();
                assert!(v >= min - 0.05 && v <= max + 0.05, "{metric}: {v}");
            }
        }
    }

    #[test]
    fn synthetic_readings_are_tenths() {
        let mut source = SyntheticSensorSource::new(7);
        for _ in 0..50 {
            let v = source.read_humidity().unwrap();
            assert!(((v * 10.0).round() - v * 10.0).abs() < 1e-6);
        }
    }

    #[test]
    fn synthetic_zero_seed_still_varies() {
        let mut source = SyntheticSensorSource::new(0);
        let first = source.read_pressure().unwrap();
        let varied = (0..20).any(|_| source.read_pressure().unwrap() != first);
        assert!(varied);
    }

    #[test]
    fn iio_reads_scaled_and_direct_channels() {
        let tmp = sense_hat_sysfs();
        let mut source = IioSensorSource::discover(tmp.path(), &MetricKind::SENSE_HAT).unwrap();

        // (-2000 + 9000) * 5.0 milli-percent
        assert!((source.read_humidity().unwrap() - 35.0).abs() < 1e-9);
        // HTS221 comes first: (300 + 2000) * 10.0 milli-degrees
        assert!((source.read_temperature().unwrap() - 23.0).abs() < 1e-9);
        // kPa to hPa
        assert!((source.read_pressure().unwrap() - 1013.25).abs() < 1e-9);
    }

    #[test]
    fn iio_missing_channel_is_unavailable() {
        let tmp = sense_hat_sysfs();
        let mut source = IioSensorSource::discover(
            tmp.path(),
            &[MetricKind::Temperature, MetricKind::Light],
        )
        .unwrap();
        assert!(!source.supports(MetricKind::Light));
        assert_eq!(
            source.read(MetricKind::Light),
            Err(SensorError::unavailable(MetricKind::Light, "no IIO channel"))
        );
    }

    #[test]
    fn iio_read_failure_is_unavailable() {
        let tmp = sense_hat_sysfs();
        let mut source = IioSensorSource::discover(tmp.path(), &MetricKind::SENSE_HAT).unwrap();
        let lps25h = tmp.path().join("bus/iio/devices/iio:device1");
        write(&lps25h, "in_pressure_input", "garbage\n");

        let err = source.read_pressure().unwrap_err();
        assert!(matches!(
            err,
            SensorError::Unavailable {
                metric: MetricKind::Pressure,
                ..
            }
        ));
    }

    #[test]
    fn iio_discover_without_devices_is_none() {
        let tmp = TempDir::new().unwrap();
        assert!(IioSensorSource::discover(tmp.path(), &MetricKind::SENSE_HAT).is_none());
    }

    #[test]
    fn iio_describe_lists_metrics() {
        let tmp = sense_hat_sysfs();
        let source = IioSensorSource::discover(tmp.path(), &MetricKind::SENSE_HAT).unwrap();
        assert_eq!(
            source.describe(),
            "IIO sysfs (humidity, pressure, temperature)"
        );
    }
}
