//! Injectable time source.
//!
//! Access-hours policy, debounce windows and state timeouts all depend on
//! wall-clock time. Every component that needs time takes a [`Clock`] at
//! construction so tests can drive it deterministically.

use std::sync::Mutex;

use chrono::{DateTime, Local, TimeDelta, TimeZone};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// The chrono counterpart of a std duration, for arithmetic on clock
/// values. Saturates instead of panicking on absurd inputs.
#[must_use]
pub fn span(duration: std::time::Duration) -> TimeDelta {
    TimeDelta::milliseconds(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Settable clock for tests. Starts at the Unix epoch.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Local>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::at(Local.timestamp_opt(0, 0).unwrap())
    }

    pub fn at(start: DateTime<Local>) -> Self {
        ManualClock {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Local>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(TimeDelta::seconds(90));
        assert_eq!(clock.now() - start, TimeDelta::seconds(90));
    }

    #[test]
    fn manual_clock_set() {
        let clock = ManualClock::new();
        let t = Local.with_ymd_and_hms(2014, 10, 10, 16, 0, 0).unwrap();
        clock.set(t);
        assert_eq!(clock.now(), t);
    }
}
