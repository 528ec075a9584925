//! Time source for scoring and timestamps.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

/// Provides the current time.
///
/// The scheduler only reads time through this trait, so tests can drive
/// staleness and timestamps with a [`ManualClock`].
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_returns_current_time() {
        let before = Utc::now();
        let now = SystemClock.now();
        assert!(now >= before);
        assert!(now <= Utc::now());
    }

    #[test]
    fn test_manual_clock_is_shared_between_clones() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        let handle = clock.clone();

        handle.advance(Duration::hours(2));
        assert_eq!(clock.now(), start + Duration::hours(2));

        clock.set(start);
        assert_eq!(handle.now(), start);
    }
}
