//! Time as an injected dependency rather than a global, so tests can pin
//! `occurred_at` timestamps and period boundaries to known values.
use chrono::{DateTime, Utc};

/// Supplies the current time. Implementations must be cheap to call and
/// safe to share across tasks.
pub trait ClockProvider: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The default clock, backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockProvider for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to a fixed instant, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(DateTime<Utc>);

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }
}

impl ClockProvider for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_never_advances() {
        let at = Utc::now();
        let clock = FixedClock::new(at);
        assert_eq!(clock.now(), at);
        assert_eq!(clock.now(), at);
    }
}
