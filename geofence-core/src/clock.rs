//! Time source for dwell timers and expirations.
//!
//! Dwell timers are stored as absolute deadlines and checked against a
//! [`Clock`], so tests drive them with a [`ManualClock`] instead of waiting.

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use manual::ManualClock;

#[cfg(any(test, feature = "test-utils"))]
mod manual {
    use std::sync::Mutex;

    use chrono::{DateTime, Duration, Utc};

    use super::Clock;

    /// Clock that only moves when told to.
    #[derive(Debug)]
    pub struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Creates a clock frozen at `start`.
        #[must_use]
        pub const fn new(start: DateTime<Utc>) -> Self {
            Self {
                now: Mutex::new(start),
            }
        }

        /// Moves the clock forward by `millis` milliseconds.
        pub fn advance_ms(&self, millis: i64) {
            if let Ok(mut now) = self.now.lock() {
                *now += Duration::milliseconds(millis);
            }
        }

        /// Sets the clock to `at`.
        pub fn set(&self, at: DateTime<Utc>) {
            if let Ok(mut now) = self.now.lock() {
                *now = at;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.now.lock().map_or_else(|e| *e.into_inner(), |now| *now)
        }
    }
}
