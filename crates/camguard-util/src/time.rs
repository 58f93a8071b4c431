//! Time utilities for camguardd
//!
//! All wall-clock bookkeeping (join timestamps, violation times, rotation
//! boundaries) is kept in UTC so that persisted state survives timezone
//! changes on the host. Cooldowns use monotonic time.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `CAMGUARD_MOCK_TIME` environment variable can be set
//! to override the system time. Format: `YYYY-MM-DD HH:MM:SS`, interpreted as
//! UTC. Mock time advances at the real rate from the configured instant.
//!
//! ```bash
//! CAMGUARD_MOCK_TIME="2025-12-25 23:59:30" ./camguardd
//! ```

use chrono::{DateTime, Days, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "CAMGUARD_MOCK_TIME";

const MOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)]
fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            let mock_time_str = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
            match NaiveDateTime::parse_from_str(&mock_time_str, MOCK_TIME_FORMAT) {
                Ok(naive_dt) => {
                    let offset = Utc.from_utc_datetime(&naive_dt).signed_duration_since(Utc::now());
                    tracing::info!(
                        mock_time = %mock_time_str,
                        offset_secs = offset.num_seconds(),
                        "Mock time enabled"
                    );
                    Some(offset)
                }
                Err(_) => {
                    tracing::warn!(
                        mock_time = %mock_time_str,
                        expected_format = MOCK_TIME_FORMAT,
                        "Invalid mock time format"
                    );
                    None
                }
            }
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Current UTC time, respecting `CAMGUARD_MOCK_TIME` in debug builds.
#[allow(clippy::disallowed_methods)]
pub fn now() -> DateTime<Utc> {
    let real_now = Utc::now();
    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Whole seconds elapsed from `earlier` to `later`, clamped at zero.
pub fn elapsed_secs(earlier: DateTime<Utc>, later: DateTime<Utc>) -> u64 {
    later.signed_duration_since(earlier).num_seconds().max(0) as u64
}

/// Represents a point in monotonic time, immune to wall-clock changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonotonicInstant(Instant);

impl MonotonicInstant {
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }

    /// Duration since `earlier`, or zero if `earlier` is later than `self`
    pub fn duration_since(&self, earlier: MonotonicInstant) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }
}

impl std::ops::Add<Duration> for MonotonicInstant {
    type Output = MonotonicInstant;

    fn add(self, rhs: Duration) -> Self::Output {
        MonotonicInstant(self.0 + rhs)
    }
}

/// A UTC time of day, used for the daily stats rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallClock {
    pub hour: u8,
    pub minute: u8,
}

impl WallClock {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self { hour, minute })
        } else {
            None
        }
    }

    pub fn to_naive_time(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour as u32, self.minute as u32, 0).unwrap_or(NaiveTime::MIN)
    }

    pub fn from_naive_time(time: NaiveTime) -> Self {
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }

    /// Returns seconds since midnight
    pub fn as_seconds_from_midnight(&self) -> u32 {
        (self.hour as u32) * 3600 + (self.minute as u32) * 60
    }

    /// The first instant strictly after `after` whose UTC time of day is `self`.
    pub fn next_occurrence_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let today = after.date_naive().and_time(self.to_naive_time());
        let candidate = Utc.from_utc_datetime(&today);
        if candidate > after {
            candidate
        } else {
            let tomorrow = today
                .checked_add_days(Days::new(1))
                .unwrap_or(today);
            Utc.from_utc_datetime(&tomorrow)
        }
    }
}

impl std::fmt::Display for WallClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl PartialOrd for WallClock {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WallClock {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_seconds_from_midnight()
            .cmp(&other.as_seconds_from_midnight())
    }
}

/// Helper to format durations in human-readable form
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_wall_clock_ordering() {
        let morning = WallClock::new(8, 0).unwrap();
        let evening = WallClock::new(18, 30).unwrap();
        assert!(morning < evening);
        assert!(WallClock::new(24, 0).is_none());
        assert!(WallClock::new(12, 60).is_none());
    }

    #[test]
    fn test_next_occurrence_later_today() {
        let rotation = WallClock::new(23, 0).unwrap();
        let next = rotation.next_occurrence_after(utc(2025, 12, 25, 14, 30, 0));
        assert_eq!(next, utc(2025, 12, 25, 23, 0, 0));
    }

    #[test]
    fn test_next_occurrence_rolls_to_tomorrow() {
        let rotation = WallClock::new(0, 0).unwrap();
        let next = rotation.next_occurrence_after(utc(2025, 12, 31, 0, 0, 0));
        assert_eq!(next, utc(2026, 1, 1, 0, 0, 0));
        assert_eq!(next.year(), 2026);
    }

    #[test]
    fn test_elapsed_secs_clamps_negative() {
        let t = utc(2025, 1, 1, 12, 0, 0);
        assert_eq!(elapsed_secs(t, t + chrono::Duration::seconds(120)), 120);
        assert_eq!(elapsed_secs(t + chrono::Duration::seconds(5), t), 0);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[test]
    fn test_monotonic_instant() {
        let t1 = MonotonicInstant::now();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = MonotonicInstant::now();

        assert!(t2 > t1);
        assert!(t2.duration_since(t1) >= Duration::from_millis(10));
        assert_eq!(t1.duration_since(t2), Duration::ZERO);
    }

    #[test]
    fn test_wall_clock_display() {
        assert_eq!(WallClock::new(7, 5).unwrap().to_string(), "07:05");
    }

    #[test]
    fn test_now_returns_time() {
        let t = now();
        assert!(t.year() >= 2020);
        assert!(t.year() <= 2100);
    }
}
