//! The main loop: poll input, sample sensors, draw, count uploads.
//!
//! One [`DemoOrchestrator`] owns every piece of mutable state (store,
//! controller, timers, sensor source, LED driver). Other threads only reach
//! it through the input channel and the shared [`StatusSnapshot`].
//!
//! ## Rust concepts
//! - Generic structs over traits (`S: SensorSource`, `D: LedDriver`, ...)
//! - `Drop` to release the display on every exit path
//! - `Arc<Mutex<T>>` for the one value shared with the HTTP threads

use crate::config::AppConfig;
use crate::display::{DisplayModeController, DisplayState};
use crate::error::{Error, StoreError};
use crate::input::{InputEvent, InputSource};
use crate::is_running;
use crate::metrics::{MetricKind, MetricSeries, SensorDataStore, TemperatureUnit};
use crate::render::LedDriver;
use crate::sensors::{SensorSource, SyntheticSensorSource};
use crate::timers::{SleepTimer, UploadCounter, UploadSchedule};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Value every buffer is pre-filled with before real samples arrive.
pub const DEFAULT_SAMPLE: f64 = 0.0;

// ── Status ───────────────────────────────────────────────────────────

/// One metric as reported by the status API.
#[derive(Clone, Debug, PartialEq, Serialize, utoipa::ToSchema)]
pub struct MetricSnapshot {
    #[schema(example = "temperature")]
    pub name: String,
    pub label: String,
    pub unit: String,
    pub min: f64,
    pub max: f64,
    pub latest: f64,
    /// Oldest first.
    pub history: Vec<f64>,
}

impl MetricSnapshot {
    fn capture(series: &MetricSeries, temp_unit: TemperatureUnit) -> Result<Self, StoreError> {
        let latest = series.latest()?;
        let (min, max) = series.limits();
        let mut snapshot = Self {
            name: series.kind().name().to_string(),
            label: series.label().to_string(),
            unit: series.unit().to_string(),
            min,
            max,
            latest,
            history: series.history(),
        };

        // readings are stored in Celsius
        if series.kind() == MetricKind::Temperature {
            snapshot.unit = temp_unit.symbol().to_string();
            snapshot.min = temp_unit.convert(min);
            snapshot.max = temp_unit.convert(max);
            snapshot.latest = temp_unit.convert(latest);
            for v in &mut snapshot.history {
                *v = temp_unit.convert(*v);
            }
        }
        Ok(snapshot)
    }
}

/// What the orchestrator last did, shared with the remote API.
#[derive(Clone, Debug, PartialEq, Serialize, utoipa::ToSchema)]
pub struct StatusSnapshot {
    /// `None` until the first cycle has run.
    pub display: Option<DisplayState>,
    pub asleep: bool,
    pub uploads: u32,
    pub upload_limit: Option<u32>,
    pub iterations: u64,
    pub metrics: Vec<MetricSnapshot>,
    pub version: String,
}

impl StatusSnapshot {
    pub fn new() -> Self {
        Self {
            display: None,
            asleep: false,
            uploads: 0,
            upload_limit: None,
            iterations: 0,
            metrics: Vec::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn metric(&self, name: &str) -> Option<&MetricSnapshot> {
        self.metrics.iter().find(|m| m.name == name)
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedStatus = Arc<Mutex<StatusSnapshot>>;

// ── Outcomes ─────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// A `Quit` event arrived.
    Quit,
    /// The configured number of uploads was reached.
    UploadLimit,
    /// The interrupt flag was cleared (Ctrl+C).
    Interrupted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Stop(StopReason),
}

/// Timestamp format for the session summary.
const SUMMARY_TIME_FORMAT: &str = "%a %d %b %Y %H:%M:%S";

/// Session summary logged when the loop ends.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub reason: StopReason,
    pub started: DateTime<Local>,
    pub finished: DateTime<Local>,
    pub elapsed: Duration,
    pub iterations: u64,
    pub uploads: u32,
}

impl RunSummary {
    /// Summary lines, in the order they are logged.
    pub fn lines(&self) -> Vec<String> {
        vec![
            "-- Session summary --".to_string(),
            format!("Work start: {}", self.started.format(SUMMARY_TIME_FORMAT)),
            format!("Work end:   {}", self.finished.format(SUMMARY_TIME_FORMAT)),
            format!("Ran for:    {:.1}s", self.elapsed.as_secs_f64()),
            format!("Stopped:    {:?}", self.reason),
            format!("Iterations: {}", self.iterations),
            format!("Uploads:    {}", self.uploads),
        ]
    }

    pub fn log(&self) {
        for line in self.lines() {
            tracing::info!("{}", line);
        }
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────

pub struct DemoOrchestrator<S: SensorSource, D: LedDriver, I: InputSource> {
    store: SensorDataStore,
    controller: DisplayModeController,
    sleep_timer: SleepTimer,
    uploads: UploadCounter,
    schedule: UploadSchedule,
    sensors: S,
    /// Stands in for individual readings the real sensors fail to deliver.
    fallback: SyntheticSensorSource,
    driver: D,
    input: I,
    interval: Duration,
    temp_unit: TemperatureUnit,
    status: Option<SharedStatus>,
    iterations: u64,
    started: DateTime<Local>,
    started_at: Instant,
    released: bool,
}

impl<S: SensorSource, D: LedDriver, I: InputSource> DemoOrchestrator<S, D, I> {
    pub fn new(config: &AppConfig, sensors: S, driver: D, input: I, now: Instant) -> Self {
        let store = SensorDataStore::new(&config.metrics, config.capacity, DEFAULT_SAMPLE);
        let controller = DisplayModeController::new(config.controller, store.kinds());

        Self {
            store,
            controller,
            sleep_timer: SleepTimer::from_secs(config.sleep_secs, now),
            uploads: UploadCounter::new(config.upload_limit),
            schedule: UploadSchedule::new(config.upload_delay, config.upload_frequency, now),
            sensors,
            fallback: SyntheticSensorSource::from_clock(),
            driver,
            input,
            interval: config.wait,
            temp_unit: config.temp_unit,
            status: None,
            iterations: 0,
            started: Local::now(),
            started_at: now,
            released: false,
        }
    }

    /// Publish a [`StatusSnapshot`] after every cycle.
    pub fn with_status(mut self, status: SharedStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_fallback(mut self, fallback: SyntheticSensorSource) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn store(&self) -> &SensorDataStore {
        &self.store
    }

    pub fn controller(&self) -> &DisplayModeController {
        &self.controller
    }

    pub fn uploads(&self) -> &UploadCounter {
        &self.uploads
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Run one cycle at time `now`.
    pub fn step(&mut self, now: Instant) -> Result<StepOutcome, Error> {
        self.iterations += 1;

        if let Some(event) = self.input.poll() {
            if event == InputEvent::Quit {
                tracing::info!("Quit requested");
                return Ok(StepOutcome::Stop(StopReason::Quit));
            }
            tracing::debug!("Input: {:?}", event);
            self.controller.apply(event);
            self.sleep_timer.note_activity(now);
        }

        self.sample()?;

        self.controller.tick(now, &self.sleep_timer);
        let frame = self
            .controller
            .render(&self.store, &self.uploads, self.schedule.progress(now))?;
        let shown = self.driver.set_pixels(&frame);

        if self.schedule.is_due(now) {
            self.uploads.record_upload();
            self.schedule.mark_uploaded(now);
            match self.uploads.limit() {
                Some(limit) => tracing::info!("Upload {} of {}", self.uploads.count(), limit),
                None => tracing::info!("Upload {}", self.uploads.count()),
            }
        }

        self.publish()?;

        if self.uploads.should_stop() {
            if let Err(e) = shown {
                tracing::warn!("Display update failed: {}", e);
            }
            tracing::info!("Reached upload limit");
            return Ok(StepOutcome::Stop(StopReason::UploadLimit));
        }

        shown?;
        Ok(StepOutcome::Continue)
    }

    /// Read one sample per tracked metric into the store.
    fn sample(&mut self) -> Result<(), StoreError> {
        for kind in self.store.kinds() {
            let value = match self.sensors.read(kind) {
                Ok(v) if v.is_finite() => v,
                Ok(v) => {
                    tracing::debug!("{} sensor returned {}; using synthetic value", kind, v);
                    self.fallback.sample(kind)
                }
                Err(e) => {
                    tracing::debug!("{}; using synthetic value", e);
                    self.fallback.sample(kind)
                }
            };
            self.store.add(kind, value)?;
        }
        Ok(())
    }

    fn publish(&self) -> Result<(), StoreError> {
        let Some(status) = &self.status else {
            return Ok(());
        };

        let metrics = self
            .store
            .iter()
            .map(|series| MetricSnapshot::capture(series, self.temp_unit))
            .collect::<Result<Vec<_>, _>>()?;

        let mut s = status.lock().unwrap_or_else(PoisonError::into_inner);
        s.display = Some(self.controller.state());
        s.asleep = self.controller.is_asleep();
        s.uploads = self.uploads.count();
        s.upload_limit = self.uploads.limit();
        s.iterations = self.iterations;
        s.metrics = metrics;
        Ok(())
    }

    /// Loop until quit, upload limit, interrupt or a fatal error. The
    /// display is cleared on the way out.
    pub fn run(&mut self, running: &AtomicBool) -> Result<RunSummary, Error> {
        tracing::info!(
            "Running: sensors {}, display {}, every {:?}",
            self.sensors.describe(),
            self.driver.describe(),
            self.interval
        );

        let reason = loop {
            if !is_running(running) {
                tracing::info!("Interrupted");
                break StopReason::Interrupted;
            }

            match self.step(Instant::now()) {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Stop(reason)) => break reason,
                Err(e) if e.is_fatal() => {
                    tracing::error!("Fatal: {}", e);
                    self.shutdown();
                    return Err(e);
                }
                Err(e) => tracing::warn!("Iteration {} failed: {}", self.iterations, e),
            }

            thread::sleep(self.interval);
        };

        self.shutdown();
        let summary = self.summary(reason);
        summary.log();
        Ok(summary)
    }

    pub fn summary(&self, reason: StopReason) -> RunSummary {
        RunSummary {
            reason,
            started: self.started,
            finished: Local::now(),
            elapsed: self.started_at.elapsed(),
            iterations: self.iterations,
            uploads: self.uploads.count(),
        }
    }

    /// Clear the display. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.driver.clear() {
            tracing::warn!("Failed to clear display: {}", e);
        }
    }
}

impl<S: SensorSource, D: LedDriver, I: InputSource> Drop for DemoOrchestrator<S, D, I> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
