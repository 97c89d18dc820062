//! Time budget helpers for bounded oracle calls.

use std::time::{Duration, Instant};

/// Remaining time until `deadline`, or `None` once it has passed.
pub fn remaining_budget(deadline: Instant) -> Option<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    (!remaining.is_zero()).then_some(remaining)
}

/// Timeout for the next attempt: the per-call limit capped by the deadline.
pub fn attempt_timeout(per_call: Duration, deadline: Instant) -> Option<Duration> {
    remaining_budget(deadline).map(|remaining| remaining.min(per_call))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_deadline_has_no_budget() {
        let past = Instant::now() - Duration::from_millis(5);
        assert!(remaining_budget(past).is_none());
        assert!(attempt_timeout(Duration::from_secs(1), past).is_none());
    }

    #[test]
    fn attempt_timeout_is_capped_by_per_call_limit() {
        let deadline = Instant::now() + Duration::from_secs(60);
        let timeout = attempt_timeout(Duration::from_secs(2), deadline).expect("budget");
        assert_eq!(timeout, Duration::from_secs(2));
    }
}
