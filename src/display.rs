//! Display state machine: which page is showing and how it is oriented.
//!
//! The controller keeps the *selected* page (readout or progress) separate
//! from the reasons the screen may be dark (powered off, asleep), so waking
//! up always returns to whatever the user was last looking at.
//!
//! ## Rust concepts
//! - `enum` state machines with exhaustive `match`
//! - `TryFrom` for validated conversions from config values
//! - Borrowing the store immutably in `render` so it cannot be mutated

use crate::error::StoreError;
use crate::frame::{self, Frame, Page};
use crate::input::InputEvent;
use crate::metrics::{MetricKind, SensorDataStore};
use crate::timers::{SleepTimer, UploadCounter};
use image::RgbImage;
use serde::Serialize;
use std::time::Instant;

// ── Modes and rotation ───────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    Readout,
    Progress,
    Blank,
}

impl DisplayMode {
    /// Map the `DISPLAY` config index onto a page.
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(DisplayMode::Readout),
            1 => Some(DisplayMode::Progress),
            _ => None,
        }
    }
}

/// Clockwise rotation of the rendered grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub enum Rotation {
    #[default]
    #[serde(rename = "0")]
    Deg0,
    #[serde(rename = "90")]
    Deg90,
    #[serde(rename = "180")]
    Deg180,
    #[serde(rename = "270")]
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Next rotation clockwise, wrapping 270 back to 0.
    pub fn next(self) -> Self {
        match self {
            Rotation::Deg0 => Rotation::Deg90,
            Rotation::Deg90 => Rotation::Deg180,
            Rotation::Deg180 => Rotation::Deg270,
            Rotation::Deg270 => Rotation::Deg0,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Rotation::Deg0 => Rotation::Deg270,
            Rotation::Deg90 => Rotation::Deg0,
            Rotation::Deg180 => Rotation::Deg90,
            Rotation::Deg270 => Rotation::Deg180,
        }
    }
}

impl TryFrom<u16> for Rotation {
    type Error = u16;

    fn try_from(degrees: u16) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(other),
        }
    }
}

// ── State ────────────────────────────────────────────────────────────

/// Snapshot of the controller, as reported to logs and the status API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct DisplayState {
    pub mode: DisplayMode,
    pub active_metric_index: usize,
    pub rotation: Rotation,
    pub powered: bool,
}

/// Startup settings for the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    pub rotation: Rotation,
    /// Page shown first. `Blank` is treated as "start powered off".
    pub initial_mode: DisplayMode,
    /// Whether the progress page (and the readout progress row) exist.
    pub progress: bool,
    pub powered: bool,
    pub grid_size: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            rotation: Rotation::Deg0,
            initial_mode: DisplayMode::Readout,
            progress: true,
            powered: true,
            grid_size: crate::GRID_SIZE,
        }
    }
}

// ── Controller ───────────────────────────────────────────────────────

pub struct DisplayModeController {
    metrics: Vec<MetricKind>,
    active_metric: usize,
    /// Last non-blank page; what the screen returns to when it wakes.
    selected: DisplayMode,
    rotation: Rotation,
    powered: bool,
    asleep: bool,
    progress: bool,
    grid_size: u32,
}

impl DisplayModeController {
    /// `metrics` is the cycle order for `next_metric` / `prev_metric`; it
    /// normally comes from [`SensorDataStore::kinds`].
    pub fn new(config: ControllerConfig, metrics: Vec<MetricKind>) -> Self {
        let selected = match config.initial_mode {
            DisplayMode::Progress if config.progress => DisplayMode::Progress,
            _ => DisplayMode::Readout,
        };
        let powered = config.powered && config.initial_mode != DisplayMode::Blank;

        Self {
            metrics,
            active_metric: 0,
            selected,
            rotation: config.rotation,
            powered,
            asleep: false,
            progress: config.progress,
            grid_size: config.grid_size.max(1),
        }
    }

    pub fn mode(&self) -> DisplayMode {
        if !self.powered || self.asleep {
            DisplayMode::Blank
        } else {
            self.selected
        }
    }

    pub fn state(&self) -> DisplayState {
        DisplayState {
            mode: self.mode(),
            active_metric_index: self.active_metric,
            rotation: self.rotation,
            powered: self.powered,
        }
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn is_asleep(&self) -> bool {
        self.asleep
    }

    pub fn active_metric_index(&self) -> usize {
        self.active_metric
    }

    pub fn active_metric(&self) -> Option<MetricKind> {
        self.metrics.get(self.active_metric).copied()
    }

    /// Turn the display off, or back on to the last page. Pressing it while
    /// asleep wakes the screen instead of powering it off.
    pub fn toggle_power(&mut self) {
        if !self.powered {
            self.powered = true;
            self.asleep = false;
        } else if self.asleep {
            self.asleep = false;
        } else {
            self.powered = false;
        }
    }

    /// Flip between readout and progress. Does nothing while dark, and never
    /// leaves readout when progress is unavailable.
    pub fn switch_mode(&mut self) {
        self.selected = match self.mode() {
            DisplayMode::Readout if self.progress => DisplayMode::Progress,
            DisplayMode::Readout => DisplayMode::Readout,
            DisplayMode::Progress => DisplayMode::Readout,
            DisplayMode::Blank => return,
        };
    }

    pub fn rotate(&mut self) {
        self.rotation = self.rotation.next();
    }

    pub fn rotate_back(&mut self) {
        self.rotation = self.rotation.prev();
    }

    pub fn next_metric(&mut self) {
        if self.mode() == DisplayMode::Readout && !self.metrics.is_empty() {
            self.active_metric = (self.active_metric + 1) % self.metrics.len();
        }
    }

    pub fn prev_metric(&mut self) {
        if self.mode() == DisplayMode::Readout && !self.metrics.is_empty() {
            let count = self.metrics.len();
            self.active_metric = (self.active_metric + count - 1) % count;
        }
    }

    /// Apply one input event. `Quit` is the orchestrator's business and is
    /// ignored here.
    pub fn apply(&mut self, event: InputEvent) {
        match event {
            InputEvent::Rotate => self.rotate(),
            InputEvent::RotateBack => self.rotate_back(),
            InputEvent::SwitchMode => self.switch_mode(),
            InputEvent::NextMetric => self.next_metric(),
            InputEvent::PrevMetric => self.prev_metric(),
            InputEvent::TogglePower => self.toggle_power(),
            InputEvent::Quit => {}
        }
    }

    /// Blank the screen while the sleep timer is expired; wake it once the
    /// timer has been reset by activity. Only applies while powered.
    pub fn tick(&mut self, now: Instant, sleep_timer: &SleepTimer) {
        if self.powered {
            self.asleep = sleep_timer.is_expired(now);
        }
    }

    /// Draw the current page. Reads the store, never mutates it.
    ///
    /// `next_upload` is how far the wait for the next upload has got
    /// (`0.0..=1.0`); it fills the readout page's bottom row.
    pub fn render(
        &self,
        store: &SensorDataStore,
        uploads: &UploadCounter,
        next_upload: f64,
    ) -> Result<Frame, StoreError> {
        let size = self.grid_size;
        let frame = match self.mode() {
            DisplayMode::Blank => return Ok(Frame::blank(size)),
            DisplayMode::Readout => self.render_readout(store, next_upload)?,
            DisplayMode::Progress => {
                let mut image = RgbImage::new(size, size);
                let fraction = uploads.fraction();
                match fraction {
                    Some(fraction) => frame::draw_progress_fill(&mut image, fraction),
                    None => frame::draw_indeterminate(&mut image, uploads.count()),
                }
                Frame::new(Page::Progress { fraction }, image)
            }
        };

        Ok(frame.rotated(self.rotation))
    }

    fn render_readout(&self, store: &SensorDataStore, next_upload: f64) -> Result<Frame, StoreError> {
        let size = self.grid_size;
        let kind = self
            .active_metric()
            .ok_or_else(|| StoreError::UnknownMetric(format!("#{}", self.active_metric)))?;
        let series = store.get_kind(kind)?;
        let latest = series.latest()?;

        let levels: Vec<f64> = series
            .tail(size as usize)
            .into_iter()
            .map(|v| series.normalized(v))
            .collect();

        let mut image = RgbImage::new(size, size);
        if self.progress && size > 1 {
            frame::draw_graph(&mut image, &levels, size - 1);
            frame::draw_progress_row(&mut image, size - 1, next_upload);
        } else {
            frame::draw_graph(&mut image, &levels, size);
        }

        Ok(Frame::new(Page::Readout { metric: kind, latest }, image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Color;
    use crate::timers::UploadSchedule;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::time::Duration;

    fn controller() -> DisplayModeController {
        DisplayModeController::new(ControllerConfig::default(), MetricKind::SENSE_HAT.to_vec())
    }

    fn store() -> SensorDataStore {
        SensorDataStore::sense_hat(10, 0.0)
    }

    // ── Transitions ────────────────────────────────────────────────

    #[test]
    fn initial_state_is_readout_on_first_metric() {
        let c = controller();
        assert_eq!(
            c.state(),
            DisplayState {
                mode: DisplayMode::Readout,
                active_metric_index: 0,
                rotation: Rotation::Deg0,
                powered: true,
            }
        );
    }

    #[test]
    fn starts_blank_when_unpowered() {
        let config = ControllerConfig {
            powered: false,
            ..ControllerConfig::default()
        };
        let c = DisplayModeController::new(config, MetricKind::SENSE_HAT.to_vec());
        assert_eq!(c.mode(), DisplayMode::Blank);
        assert!(!c.is_powered());
    }

    #[test]
    fn starts_on_progress_when_configured() {
        let config = ControllerConfig {
            initial_mode: DisplayMode::Progress,
            ..ControllerConfig::default()
        };
        let c = DisplayModeController::new(config, MetricKind::SENSE_HAT.to_vec());
        assert_eq!(c.mode(), DisplayMode::Progress);
    }

    #[test]
    fn switch_mode_has_cycle_length_two() {
        let mut c = controller();
        c.switch_mode();
        assert_eq!(c.mode(), DisplayMode::Progress);
        c.switch_mode();
        assert_eq!(c.mode(), DisplayMode::Readout);
    }

    #[test]
    fn switch_mode_stays_on_readout_without_progress() {
        let config = ControllerConfig {
            progress: false,
            initial_mode: DisplayMode::Progress,
            ..ControllerConfig::default()
        };
        let mut c = DisplayModeController::new(config, MetricKind::SENSE_HAT.to_vec());
        assert_eq!(c.mode(), DisplayMode::Readout);
        c.switch_mode();
        assert_eq!(c.mode(), DisplayMode::Readout);
    }

    #[test]
    fn switch_mode_never_enters_or_leaves_blank() {
        let mut c = controller();
        c.toggle_power();
        c.switch_mode();
        assert_eq!(c.mode(), DisplayMode::Blank);
        c.toggle_power();
        assert_eq!(c.mode(), DisplayMode::Readout);
    }

    #[test]
    fn rotate_four_times_is_identity() {
        let mut c = controller();
        let seen: Vec<u16> = (0..4)
            .map(|_| {
                c.rotate();
                c.rotation().degrees()
            })
            .collect();
        assert_eq!(seen, vec![90, 180, 270, 0]);
        assert_eq!(c.mode(), DisplayMode::Readout);
    }

    #[test]
    fn rotate_back_undoes_rotate() {
        let mut c = controller();
        c.rotate_back();
        assert_eq!(c.rotation(), Rotation::Deg270);
        c.rotate();
        assert_eq!(c.rotation(), Rotation::Deg0);
    }

    #[test]
    fn next_metric_wraps_around() {
        let mut c = controller();
        for _ in 0..3 {
            c.next_metric();
        }
        assert_eq!(c.active_metric_index(), 0);
    }

    #[test]
    fn prev_metric_wraps_to_last() {
        let mut c = controller();
        c.prev_metric();
        assert_eq!(c.active_metric_index(), 2);
        assert_eq!(c.active_metric(), Some(MetricKind::Humidity));
    }

    #[test]
    fn metric_navigation_ignored_outside_readout() {
        let mut c = controller();
        c.switch_mode();
        c.next_metric();
        assert_eq!(c.active_metric_index(), 0);
        c.switch_mode();
        c.toggle_power();
        c.prev_metric();
        assert_eq!(c.active_metric_index(), 0);
    }

    #[test]
    fn toggle_power_returns_to_last_page() {
        let mut c = controller();
        c.switch_mode();
        c.toggle_power();
        assert_eq!(c.mode(), DisplayMode::Blank);
        assert!(!c.is_powered());
        c.toggle_power();
        assert_eq!(c.mode(), DisplayMode::Progress);
        assert!(c.is_powered());
    }

    #[rstest]
    #[case(InputEvent::Rotate, Rotation::Deg90, DisplayMode::Readout, 0)]
    #[case(InputEvent::RotateBack, Rotation::Deg270, DisplayMode::Readout, 0)]
    #[case(InputEvent::SwitchMode, Rotation::Deg0, DisplayMode::Progress, 0)]
    #[case(InputEvent::NextMetric, Rotation::Deg0, DisplayMode::Readout, 1)]
    #[case(InputEvent::PrevMetric, Rotation::Deg0, DisplayMode::Readout, 2)]
    #[case(InputEvent::TogglePower, Rotation::Deg0, DisplayMode::Blank, 0)]
    #[case(InputEvent::Quit, Rotation::Deg0, DisplayMode::Readout, 0)]
    fn apply_dispatches_events(
        #[case] event: InputEvent,
        #[case] rotation: Rotation,
        #[case] mode: DisplayMode,
        #[case] metric: usize,
    ) {
        let mut c = controller();
        c.apply(event);
        assert_eq!(c.rotation(), rotation);
        assert_eq!(c.mode(), mode);
        assert_eq!(c.active_metric_index(), metric);
    }

    // ── Sleep ──────────────────────────────────────────────────────

    #[test]
    fn tick_blanks_when_timer_expires_and_wakes_after_activity() {
        let start = Instant::now();
        let mut timer = SleepTimer::from_secs(60, start);
        let mut c = controller();

        c.tick(start + Duration::from_secs(59), &timer);
        assert_eq!(c.mode(), DisplayMode::Readout);

        c.tick(start + Duration::from_secs(60), &timer);
        assert_eq!(c.mode(), DisplayMode::Blank);
        assert!(c.is_powered(), "sleep does not power off");

        timer.note_activity(start + Duration::from_secs(70));
        c.tick(start + Duration::from_secs(70), &timer);
        assert_eq!(c.mode(), DisplayMode::Readout);
    }

    #[test]
    fn user_input_in_same_cycle_beats_expiring_timer() {
        let start = Instant::now();
        let mut timer = SleepTimer::from_secs(60, start);
        let mut c = controller();
        let now = start + Duration::from_secs(60);

        // input arrives in the same cycle the timer would expire
        c.apply(InputEvent::SwitchMode);
        timer.note_activity(now);
        c.tick(now, &timer);
        assert_eq!(c.mode(), DisplayMode::Progress);
    }

    #[test]
    fn toggle_while_asleep_wakes() {
        let start = Instant::now();
        let timer = SleepTimer::from_secs(1, start);
        let mut c = controller();
        c.tick(start + Duration::from_secs(5), &timer);
        assert!(c.is_asleep());

        c.toggle_power();
        assert!(c.is_powered());
        assert_eq!(c.mode(), DisplayMode::Readout);
    }

    #[test]
    fn tick_ignored_while_powered_off() {
        let start = Instant::now();
        let timer = SleepTimer::from_secs(1, start);
        let mut c = controller();
        c.toggle_power();
        c.tick(start + Duration::from_secs(5), &timer);
        assert!(!c.is_asleep());
        c.toggle_power();
        assert_eq!(c.mode(), DisplayMode::Readout);
    }

    // ── Rendering ──────────────────────────────────────────────────

    #[test]
    fn render_blank_is_dark() {
        let mut c = controller();
        c.toggle_power();
        let frame = c.render(&store(), &UploadCounter::new(None), 0.0).unwrap();
        assert_eq!(frame.page(), &Page::Blank);
        assert!(frame.is_dark());
    }

    #[test]
    fn render_readout_describes_active_metric() {
        let mut store = store();
        store.add(MetricKind::Pressure, 1000.0).unwrap();
        let mut c = controller();
        c.next_metric();

        let frame = c.render(&store, &UploadCounter::new(None), 0.0).unwrap();
        assert_eq!(
            frame.page(),
            &Page::Readout {
                metric: MetricKind::Pressure,
                latest: 1000.0,
            }
        );
    }

    #[test]
    fn render_readout_reserves_progress_row() {
        let mut store = store();
        for _ in 0..8 {
            store.add(MetricKind::Temperature, 65.0).unwrap();
        }
        let frame = controller()
            .render(&store, &UploadCounter::new(None), 0.5)
            .unwrap();
        // top 7 rows graph, bottom row half-filled progress
        for x in 0..8 {
            assert_ne!(frame.pixel(x, 0), Color::BLACK);
        }
        let bar: Vec<bool> = (0..8).map(|x| frame.pixel(x, 7) == Color::CYAN).collect();
        assert_eq!(bar, vec![true, true, true, true, false, false, false, false]);
    }

    #[test]
    fn readout_progress_row_tracks_time_to_next_upload() {
        let start = Instant::now();
        let schedule = UploadSchedule::new(Duration::from_secs(80), Duration::from_secs(80), start);
        let mut uploads = UploadCounter::new(Some(1));
        uploads.record_upload();
        let c = controller();

        let lit_at = |s: u64| {
            let progress = schedule.progress(start + Duration::from_secs(s));
            let frame = c.render(&store(), &uploads, progress).unwrap();
            (0..8).filter(|&x| frame.pixel(x, 7) == Color::CYAN).count()
        };
        // the upload count does not drive this row
        assert_eq!(lit_at(0), 0);
        assert_eq!(lit_at(20), 2);
        assert_eq!(lit_at(60), 6);
        assert_eq!(lit_at(80), 8);
    }

    #[test]
    fn render_readout_uses_full_height_without_progress() {
        let mut store = store();
        for _ in 0..8 {
            store.add(MetricKind::Temperature, 65.0).unwrap();
        }
        let config = ControllerConfig {
            progress: false,
            ..ControllerConfig::default()
        };
        let c = DisplayModeController::new(config, store.kinds());
        let frame = c.render(&store, &UploadCounter::new(None), 0.0).unwrap();
        assert_eq!(frame.lit_count(), 64);
    }

    #[test]
    fn render_does_not_mutate_store() {
        let store = store();
        let before = store.history("temperature").unwrap();
        let _ = controller().render(&store, &UploadCounter::new(None), 0.0).unwrap();
        assert_eq!(store.history("temperature").unwrap(), before);
    }

    #[test]
    fn render_progress_with_limit_fills_fraction() {
        let mut c = controller();
        c.switch_mode();
        let mut uploads = UploadCounter::new(Some(4));
        uploads.record_upload();

        let frame = c.render(&store(), &uploads, 0.0).unwrap();
        assert_eq!(frame.page(), &Page::Progress { fraction: Some(0.25) });
        assert_eq!(frame.lit_count(), 16);
    }

    #[test]
    fn render_progress_without_limit_is_indeterminate() {
        let mut c = controller();
        c.switch_mode();
        let frame = c.render(&store(), &UploadCounter::new(None), 0.0).unwrap();
        assert_eq!(frame.page(), &Page::Progress { fraction: None });
        assert!(!frame.is_dark());
    }

    #[test]
    fn render_applies_rotation() {
        let mut store = store();
        store.add(MetricKind::Temperature, 65.0).unwrap();
        let config = ControllerConfig {
            progress: false,
            ..ControllerConfig::default()
        };
        let mut c = DisplayModeController::new(config, store.kinds());

        let upright = c.render(&store, &UploadCounter::new(None), 0.0).unwrap();
        assert_ne!(upright.pixel(7, 0), Color::BLACK);

        c.rotate();
        c.rotate();
        let flipped = c.render(&store, &UploadCounter::new(None), 0.0).unwrap();
        assert_ne!(flipped.pixel(0, 7), Color::BLACK);
        assert_eq!(flipped.pixel(7, 0), Color::BLACK);
    }

    #[test]
    fn render_unknown_metric_fails() {
        let c = DisplayModeController::new(ControllerConfig::default(), vec![MetricKind::Light]);
        let err = c.render(&store(), &UploadCounter::new(None), 0.0).unwrap_err();
        assert_eq!(err, StoreError::UnknownMetric("light".into()));
    }

    #[rstest]
    #[case(0, Some(DisplayMode::Readout))]
    #[case(1, Some(DisplayMode::Progress))]
    #[case(2, None)]
    fn display_mode_from_index(#[case] index: usize, #[case] expected: Option<DisplayMode>) {
        assert_eq!(DisplayMode::from_index(index), expected);
    }

    #[rstest]
    #[case(0, Ok(Rotation::Deg0))]
    #[case(270, Ok(Rotation::Deg270))]
    #[case(45, Err(45))]
    fn rotation_from_degrees(#[case] degrees: u16, #[case] expected: Result<Rotation, u16>) {
        assert_eq!(Rotation::try_from(degrees), expected);
    }
}
