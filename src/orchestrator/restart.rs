//! Restart backoff calculator.
//!
//! Pure function computing the delay before re-spawning an instance after
//! an `error` caused by `spawn_error`, `exited_unexpectedly`, or
//! `heartbeat_lost`. Kept free of any `Instant`/timer state so it can be
//! exhaustively unit-tested against its boundary cases directly.

use rand::Rng;

/// Initial backoff, in seconds.
pub const INITIAL_BACKOFF_S: f64 = 1.0;
/// Backoff cap, in seconds.
pub const CAP_BACKOFF_S: f64 = 60.0;
/// Multiplicative growth factor per consecutive failure.
pub const BACKOFF_FACTOR: f64 = 2.0;
/// Jitter applied as a fraction of the computed delay, e.g. 0.25 = ±25%.
pub const JITTER_FRACTION: f64 = 0.25;

/// Compute the jittered backoff delay, in seconds, for the `attempt`-th
/// consecutive failure (0-based: the first retry is `attempt == 0`).
///
/// Grows exponentially from [`INITIAL_BACKOFF_S`] by [`BACKOFF_FACTOR`] per
/// attempt, capped at [`CAP_BACKOFF_S`], then jittered by ±[`JITTER_FRACTION`].
#[must_use]
pub fn next_backoff(attempt: u32, rng: &mut impl Rng) -> f64 {
    let base = INITIAL_BACKOFF_S * BACKOFF_FACTOR.powi(attempt.min(32) as i32);
    let capped = base.min(CAP_BACKOFF_S);
    let jitter = rng.gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
    (capped * (1.0 + jitter)).max(0.0)
}

/// Whether the instance has exhausted its restart budget and should stick
/// at `error` rather than scheduling another restart.
#[must_use]
pub fn budget_exhausted(consecutive_failures: u32, max_consecutive_restart_failures: u32) -> bool {
    consecutive_failures >= max_consecutive_restart_failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn first_attempt_is_near_initial_backoff() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let delay = next_backoff(0, &mut rng);
        assert!((0.75..=1.25).contains(&delay));
    }

    #[test]
    fn backoff_caps_even_with_many_consecutive_failures() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(2);
        for attempt in 10..40 {
            let delay = next_backoff(attempt, &mut rng);
            assert!(delay <= CAP_BACKOFF_S * (1.0 + JITTER_FRACTION));
        }
    }

    #[test]
    fn budget_exhaustion_boundary() {
        assert!(!budget_exhausted(4, 5));
        assert!(budget_exhausted(5, 5));
        assert!(budget_exhausted(6, 5));
    }
}
