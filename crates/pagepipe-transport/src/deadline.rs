use std::time::{Duration, Instant};

use crate::error::{Result, TransportError};

/// Budgets are capped here when computing the expiry instant.
const MAX_BUDGET: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// An absolute point on the monotonic clock that bounds one operation.
///
/// Built fresh from a duration at the start of each operation and never
/// pushed back; callers that need another budget build another deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    /// Deadline `budget` from now.
    ///
    /// Budgets past the clock's range behave as a deadline a century away.
    pub fn after(budget: Duration) -> Self {
        let now = Instant::now();
        let at = now.checked_add(budget.min(MAX_BUDGET)).unwrap_or(now);
        Self { at, budget }
    }

    /// The instant at which the deadline expires.
    pub fn instant(&self) -> Instant {
        self.at
    }

    /// The original budget this deadline was built from.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left, or `Timeout` once the deadline has passed.
    pub fn remaining(&self) -> Result<Duration> {
        match self.at.checked_duration_since(Instant::now()) {
            Some(left) if !left.is_zero() => Ok(left),
            _ => Err(self.expired()),
        }
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// The error reported when this deadline runs out.
    pub fn expired(&self) -> TransportError {
        TransportError::Timeout {
            budget: self.budget,
        }
    }

    /// The earlier of two deadlines.
    pub fn min(self, other: Deadline) -> Deadline {
        if other.at < self.at {
            other
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_shrinks_and_then_times_out() {
        let deadline = Deadline::after(Duration::from_millis(30));
        let left = deadline.remaining().unwrap();
        assert!(left <= Duration::from_millis(30));

        std::thread::sleep(Duration::from_millis(40));
        assert!(deadline.is_expired());
        let err = deadline.remaining().unwrap_err();
        assert!(matches!(
            err,
            TransportError::Timeout { budget } if budget == Duration::from_millis(30)
        ));
    }

    #[test]
    fn zero_budget_is_already_expired() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.remaining().is_err());
    }

    #[test]
    fn huge_budget_does_not_overflow() {
        let budget = Duration::from_secs_f64(1e19);
        let deadline = Deadline::after(budget);
        assert_eq!(deadline.budget(), budget);
        assert!(!deadline.is_expired());
        assert!(deadline.remaining().unwrap() > Duration::from_secs(365 * 24 * 60 * 60));

        let max = Deadline::after(Duration::MAX);
        assert!(max.remaining().is_ok());
    }

    #[test]
    fn min_picks_earlier_deadline() {
        let short = Deadline::after(Duration::from_millis(10));
        let long = Deadline::after(Duration::from_secs(10));
        assert_eq!(long.min(short), short);
        assert_eq!(short.min(long), short);
    }
}
