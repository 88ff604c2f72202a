use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Source of commit and operation timestamps. Every clock read in the crate
/// goes through one of these so tests can pin time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock that starts at a fixed instant and advances by one
/// second per read, so successive timestamps remain distinct and ordered.
pub struct FixedClock {
    current: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// A clock pinned to 2001-01-01T01:01:01Z, the epoch used across tests
    pub fn default_epoch() -> Self {
        Self::new(Utc.with_ymd_and_hms(2001, 1, 1, 1, 1, 1).unwrap())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let mut current = self.current.lock().unwrap();
        let now = *current;
        *current = now + Duration::seconds(1);
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances_per_read() {
        let clock = FixedClock::default_epoch();
        let first = clock.now();
        let second = clock.now();
        assert_eq!(second - first, Duration::seconds(1));
    }
}
