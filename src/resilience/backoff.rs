//! Exponential backoff with optional jitter.

use rand::Rng;
use std::time::Duration;

/// Calculate the delay that precedes `attempt` (1-based).
///
/// For the n-th retry (attempt `n + 1`) the delay is
/// `min(max_ms, base_ms * multiplier^(n-1))`. Attempt 1 is the first try
/// and never waits. With `jitter` enabled, up to 10% of the
/// capped delay is added on top.
pub fn calculate_backoff(
    attempt: u32,
    base_ms: u64,
    max_ms: u64,
    multiplier: f64,
    jitter: bool,
) -> Duration {
    if attempt <= 1 {
        return Duration::ZERO;
    }

    let factor = multiplier.max(1.0).powi((attempt - 2) as i32);
    let delay_ms = (base_ms as f64 * factor).min(max_ms as f64) as u64;

    let jitter_ms = if jitter {
        let jitter_range = delay_ms / 10;
        if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        }
    } else {
        0
    };

    Duration::from_millis(delay_ms + jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_has_no_delay() {
        assert_eq!(calculate_backoff(1, 1000, 30_000, 2.0, false), Duration::ZERO);
        assert_eq!(calculate_backoff(0, 1000, 30_000, 2.0, true), Duration::ZERO);
    }

    #[test]
    fn test_backoff_calculation() {
        // Delay before the second attempt is the initial delay.
        assert_eq!(calculate_backoff(2, 1000, 30_000, 2.0, false), Duration::from_millis(1000));
        assert_eq!(calculate_backoff(3, 1000, 30_000, 2.0, false), Duration::from_millis(2000));
        assert_eq!(calculate_backoff(4, 1000, 30_000, 2.0, false), Duration::from_millis(4000));

        let max = calculate_backoff(20, 1000, 30_000, 2.0, false);
        assert_eq!(max, Duration::from_millis(30_000));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        for _ in 0..50 {
            let d = calculate_backoff(3, 1000, 30_000, 2.0, true);
            assert!(d >= Duration::from_millis(2000));
            assert!(d < Duration::from_millis(2200));
        }
    }
}
