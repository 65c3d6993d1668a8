//! Retry rule table and backoff calculator.
//!
//! Pure functions: no state, no locking. Kept separate from the dispatcher
//! so the retry policy can be unit-tested without spinning up a queue.

use crate::error::ErrorKind;

/// Whether a failure of the given kind should be retried, before
/// considering the attempt count.
///
/// `validation`, `not_found`, `cancelled`, and `internal` never retry;
/// `timeout`, `transient_network`, and `dependency_unavailable` do, matching
/// [`crate::error::FleetError::retryable_by_default`].
pub fn should_retry(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Timeout | ErrorKind::TransientNetwork | ErrorKind::DependencyUnavailable
    )
}

/// Exponential backoff delay for the given zero-based attempt number,
/// capped at `max_ms`.
pub fn backoff_delay_ms(base_ms: u64, max_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(1u64 << attempt.min(32)).min(max_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(should_retry(ErrorKind::Timeout));
        assert!(should_retry(ErrorKind::TransientNetwork));
        assert!(should_retry(ErrorKind::DependencyUnavailable));
    }

    #[test]
    fn non_retryable_kinds() {
        assert!(!should_retry(ErrorKind::Validation));
        assert!(!should_retry(ErrorKind::NotFound));
        assert!(!should_retry(ErrorKind::Cancelled));
        assert!(!should_retry(ErrorKind::Internal));
        assert!(!should_retry(ErrorKind::Storage));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay_ms(100, 10_000, 0), 100);
        assert_eq!(backoff_delay_ms(100, 10_000, 1), 200);
        assert_eq!(backoff_delay_ms(100, 10_000, 2), 400);
        assert_eq!(backoff_delay_ms(100, 1_000, 10), 1_000);
    }
}
