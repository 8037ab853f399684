//! Adaptive poll interval.
//!
//! Chooses the delay before the next tick from wall-clock time and recent
//! detection activity. Priority order:
//! 1. activity within the activity window → `activity_interval`
//! 2. a prime-time window (weekday + hour range) → `peak_interval`
//! 3. the daily peak-hour range → `peak_interval`
//! 4. otherwise `base_interval`
//!
//! All times are UTC.

use chrono::{DateTime, Datelike, Duration as TimeDelta, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Half-open hour range `[start_hour, end_hour)`. Wraps past midnight when
/// `start_hour > end_hour`; empty when they are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourRange {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl HourRange {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self { start_hour, end_hour }
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour < self.end_hour {
            self.start_hour <= hour && hour < self.end_hour
        } else if self.start_hour > self.end_hour {
            hour >= self.start_hour || hour < self.end_hour
        } else {
            false
        }
    }
}

/// A recurring weekly window, e.g. the hours after Wednesday maintenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimeWindow {
    pub weekday: Weekday,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl PrimeWindow {
    pub fn new(weekday: Weekday, start_hour: u32, end_hour: u32) -> Self {
        Self { weekday, start_hour, end_hour }
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        now.weekday() == self.weekday
            && HourRange::new(self.start_hour, self.end_hour).contains(now.hour())
    }
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub base_interval: Duration,
    pub peak_interval: Duration,
    pub activity_interval: Duration,
    pub activity_window: TimeDelta,
    /// `None` disables the daily peak boost.
    pub peak_hours: Option<HourRange>,
    /// Empty disables the prime-time boost.
    pub prime_time: Vec<PrimeWindow>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs_f64(2.0),
            peak_interval: Duration::from_secs_f64(1.0),
            activity_interval: Duration::from_secs_f64(1.5),
            activity_window: TimeDelta::seconds(300),
            peak_hours: Some(HourRange::new(18, 22)),
            prime_time: default_prime_time(),
        }
    }
}

/// Post-maintenance Wednesday plus Friday/Saturday evenings.
pub fn default_prime_time() -> Vec<PrimeWindow> {
    vec![
        PrimeWindow::new(Weekday::Wed, 10, 14),
        PrimeWindow::new(Weekday::Fri, 18, 23),
        PrimeWindow::new(Weekday::Sat, 18, 23),
    ]
}

/// Which rule picked the interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PollMode {
    Activity,
    PrimeTime,
    PeakHours,
    Base,
}

impl std::fmt::Display for PollMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollMode::Activity => write!(f, "activity"),
            PollMode::PrimeTime => write!(f, "prime-time"),
            PollMode::PeakHours => write!(f, "peak-hours"),
            PollMode::Base => write!(f, "base"),
        }
    }
}

// ---------------------------------------------------------------------------
// Pure interval selection
// ---------------------------------------------------------------------------

/// Pick the polling mode for `now` given recent activity timestamps.
pub fn poll_mode<'a>(
    config: &PollerConfig,
    now: DateTime<Utc>,
    recent_activity: impl IntoIterator<Item = &'a DateTime<Utc>>,
) -> PollMode {
    if recent_activity
        .into_iter()
        .any(|t| now - *t <= config.activity_window)
    {
        return PollMode::Activity;
    }
    if config.prime_time.iter().any(|w| w.contains(now)) {
        return PollMode::PrimeTime;
    }
    if config.peak_hours.is_some_and(|r| r.contains(now.hour())) {
        return PollMode::PeakHours;
    }
    PollMode::Base
}

pub fn interval_for(config: &PollerConfig, mode: PollMode) -> Duration {
    match mode {
        PollMode::Activity => config.activity_interval,
        PollMode::PrimeTime | PollMode::PeakHours => config.peak_interval,
        PollMode::Base => config.base_interval,
    }
}

/// Delay before the next tick. Side-effect free.
pub fn get_interval<'a>(
    config: &PollerConfig,
    now: DateTime<Utc>,
    recent_activity: impl IntoIterator<Item = &'a DateTime<Utc>>,
) -> Duration {
    interval_for(config, poll_mode(config, now, recent_activity))
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerStats {
    pub total_polls: u64,
    pub activity_count: u64,
    pub recent_activity: usize,
    pub mode: PollMode,
    pub current_interval_ms: u64,
}

/// Holds the rolling activity window. Old entries are pruned lazily.
#[derive(Debug)]
pub struct AdaptivePoller {
    config: PollerConfig,
    recent: VecDeque<DateTime<Utc>>,
    total_polls: u64,
    activity_count: u64,
}

impl AdaptivePoller {
    pub fn new(config: PollerConfig) -> Self {
        Self {
            config,
            recent: VecDeque::new(),
            total_polls: 0,
            activity_count: 0,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn mode(&self, now: DateTime<Utc>) -> PollMode {
        poll_mode(&self.config, now, &self.recent)
    }

    pub fn get_interval(&self, now: DateTime<Utc>) -> Duration {
        get_interval(&self.config, now, &self.recent)
    }

    /// `get_interval` for the loop: also counts the poll and prunes.
    pub fn next_interval(&mut self, now: DateTime<Utc>) -> Duration {
        self.total_polls += 1;
        self.prune(now);
        self.get_interval(now)
    }

    /// Note a detection at `now`; boosts polling for the activity window.
    pub fn record_activity(&mut self, now: DateTime<Utc>) {
        self.recent.push_back(now);
        self.activity_count += 1;
        self.prune(now);
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        while let Some(oldest) = self.recent.front() {
            if now - *oldest > self.config.activity_window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn stats(&self, now: DateTime<Utc>) -> PollerStats {
        let mode = self.mode(now);
        PollerStats {
            total_polls: self.total_polls,
            activity_count: self.activity_count,
            recent_activity: self.recent.len(),
            mode,
            current_interval_ms: interval_for(&self.config, mode).as_millis() as u64,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
