//! Time as an injected dependency.
//!
//! Every decision in this daemon that depends on "now" — policy activity,
//! retention age, ticket validity, audit timestamps — takes a [`Clock`]
//! rather than reading the wall clock directly, so that tests can fix time
//! instead of racing it.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of the current time, expressed as Unix seconds.
pub trait Clock: Send + Sync {
    /// The current time, in seconds since the Unix epoch.
    fn now(&self) -> i64;
}

/// The real wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// A clock fixed to (or steppable from) a given instant, for tests.
#[derive(Debug)]
pub struct FixedClock(AtomicI64);

impl FixedClock {
    pub fn new(now: i64) -> Self {
        Self(AtomicI64::new(now))
    }

    /// Advance the clock by `secs` seconds, returning the new time.
    pub fn advance(&self, secs: i64) -> i64 {
        self.0.fetch_add(secs, Ordering::SeqCst) + secs
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// The number of whole days (rounded up) between two Unix timestamps.
///
/// Used for the "N days remaining" wording in retention-denial reasons
/// (spec §4.2: `ceil((retention − age) / 1 day)`).
pub fn ceil_days(secs: i64) -> i64 {
    const DAY: i64 = 86_400;
    if secs <= 0 {
        0
    } else {
        (secs + DAY - 1) / DAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(1_000);
        assert_eq!(clock.now(), 1_000);
        assert_eq!(clock.advance(500), 1_500);
        assert_eq!(clock.now(), 1_500);
    }

    #[test]
    fn ceil_days_rounds_up() {
        assert_eq!(ceil_days(0), 0);
        assert_eq!(ceil_days(1), 1);
        assert_eq!(ceil_days(86_400), 1);
        assert_eq!(ceil_days(86_401), 2);
        assert_eq!(ceil_days(-10), 0);
    }
}
