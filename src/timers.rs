//! Time-driven session state: display sleep, upload counting and scheduling.
//!
//! All queries take `now` as a parameter instead of reading the clock, so the
//! orchestrator controls time and tests can step it deterministically.

use std::time::{Duration, Instant};

// ── SleepTimer ───────────────────────────────────────────────────────

/// Tracks idle time since the last user interaction.
#[derive(Clone, Copy, Debug)]
pub struct SleepTimer {
    last_activity: Instant,
    timeout: Option<Duration>,
}

impl SleepTimer {
    /// A `None` timeout means the display never sleeps.
    pub fn new(timeout: Option<Duration>, now: Instant) -> Self {
        Self {
            last_activity: now,
            timeout: timeout.filter(|t| !t.is_zero()),
        }
    }

    /// Build from a configured number of seconds; `<= 0` disables sleep.
    pub fn from_secs(seconds: i64, now: Instant) -> Self {
        let timeout = u64::try_from(seconds).ok().map(Duration::from_secs);
        Self::new(timeout, now)
    }

    pub fn note_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        match self.timeout {
            Some(timeout) => now.saturating_duration_since(self.last_activity) >= timeout,
            None => false,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }
}

// ── UploadCounter ────────────────────────────────────────────────────

/// Counts upload events and reports when the configured limit is reached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadCounter {
    count: u32,
    limit: Option<u32>,
}

impl UploadCounter {
    pub fn new(limit: Option<u32>) -> Self {
        Self { count: 0, limit }
    }

    pub fn record_upload(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    pub fn should_stop(&self) -> bool {
        self.limit.is_some_and(|limit| self.count >= limit)
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    /// `count / limit` clamped to `0.0..=1.0`, or `None` without a limit.
    pub fn fraction(&self) -> Option<f64> {
        match self.limit {
            Some(0) => Some(1.0),
            Some(limit) => Some((self.count as f64 / limit as f64).min(1.0)),
            None => None,
        }
    }
}

// ── UploadSchedule ───────────────────────────────────────────────────

/// Decides when the next (simulated) upload happens: once after an initial
/// delay, then at a fixed frequency.
#[derive(Clone, Copy, Debug)]
pub struct UploadSchedule {
    frequency: Duration,
    /// Start of the current wait (startup, or the last upload).
    last: Instant,
    /// `None` when the wait runs past what `Instant` can represent.
    next_due: Option<Instant>,
}

impl UploadSchedule {
    pub fn new(delay: Duration, frequency: Duration, start: Instant) -> Self {
        Self {
            frequency,
            last: start,
            next_due: start.checked_add(delay),
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due.is_some_and(|due| now >= due)
    }

    pub fn mark_uploaded(&mut self, now: Instant) {
        self.last = now;
        self.next_due = now.checked_add(self.frequency);
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    /// How far the current wait has got, `0.0..=1.0`.
    pub fn progress(&self, now: Instant) -> f64 {
        let Some(due) = self.next_due else {
            return 0.0;
        };
        let span = due.saturating_duration_since(self.last);
        if span.is_zero() {
            return 1.0;
        }
        let waited = now.saturating_duration_since(self.last);
        (waited.as_secs_f64() / span.as_secs_f64()).clamp(0.0, 1.0)
    }
}
