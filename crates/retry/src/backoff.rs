//! Delay schedules between retry attempts.

use std::time::Duration;

use rand::Rng;

/// Computes how long to wait before the next attempt.
///
/// `attempt` is zero-based and grows by one per failed attempt. Linear and
/// exponential schedules are capped at `max` when `max` is non-zero. Jitter
/// in `(0, 1)` scales the capped delay by a uniform factor in
/// `[1 - jitter, 1 + jitter]`; any other jitter value is ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// The same interval before every attempt.
    Fixed { interval: Duration, jitter: f64 },
    /// `base + attempt * step`.
    Linear {
        base: Duration,
        step: Duration,
        max: Duration,
        jitter: f64,
    },
    /// `base * factor^attempt`.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: f64,
    },
}

impl Backoff {
    /// Creates a fixed schedule without jitter.
    pub fn fixed(interval: Duration) -> Self {
        Self::Fixed {
            interval,
            jitter: 0.0,
        }
    }

    /// Creates a linear schedule without jitter.
    pub fn linear(base: Duration, step: Duration, max: Duration) -> Self {
        Self::Linear {
            base,
            step,
            max,
            jitter: 0.0,
        }
    }

    /// Creates an exponential schedule without jitter.
    pub fn exponential(base: Duration, factor: f64, max: Duration) -> Self {
        Self::Exponential {
            base,
            factor,
            max,
            jitter: 0.0,
        }
    }

    /// Returns the same schedule with the given jitter fraction.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        match &mut self {
            Self::Fixed { jitter, .. }
            | Self::Linear { jitter, .. }
            | Self::Exponential { jitter, .. } => *jitter = fraction,
        }
        self
    }

    /// Returns the configured jitter fraction.
    pub fn jitter(&self) -> f64 {
        match self {
            Self::Fixed { jitter, .. }
            | Self::Linear { jitter, .. }
            | Self::Exponential { jitter, .. } => *jitter,
        }
    }

    /// Returns the jittered delay before the attempt following `attempt`.
    pub fn next(&self, attempt: u32) -> Duration {
        apply_jitter(self.base_delay(attempt), self.jitter())
    }

    /// Returns the capped delay before jitter is applied.
    ///
    /// Never overflows: an uncapped schedule saturates at `Duration::MAX`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { interval, .. } => *interval,
            Self::Linear {
                base, step, max, ..
            } => {
                let raw = step
                    .checked_mul(attempt)
                    .and_then(|offset| base.checked_add(offset));
                cap(raw, *max)
            }
            Self::Exponential {
                base, factor, max, ..
            } => {
                let nanos = base.as_nanos() as f64 * factor.powf(f64::from(attempt));
                cap(nanos_to_duration(nanos), *max)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::linear(
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(10),
        )
        .with_jitter(0.1)
    }
}

/// Scales `delay` by `1 + u`, `u` uniform in `[-jitter, jitter]`.
///
/// Jitter outside the open interval `(0, 1)`, including NaN, returns the
/// delay unchanged.
pub fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if !(jitter > 0.0 && jitter < 1.0) {
        return delay;
    }
    let u = rand::thread_rng().gen_range(-jitter..=jitter);
    let nanos = delay.as_nanos() as f64 * (1.0 + u);
    nanos_to_duration(nanos).unwrap_or(Duration::MAX)
}

/// `None` means the value does not fit a nanosecond count. Negative values
/// clamp to zero.
fn nanos_to_duration(nanos: f64) -> Option<Duration> {
    if !nanos.is_finite() || nanos >= u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(nanos.max(0.0) as u64))
}

fn cap(raw: Option<Duration>, max: Duration) -> Duration {
    match raw {
        Some(delay) if max.is_zero() || delay <= max => delay,
        Some(_) => max,
        None if max.is_zero() => Duration::MAX,
        None => max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_within(got: Duration, expected: Duration, jitter: f64) {
        let low = expected.as_nanos() as f64 * (1.0 - jitter) - 1.0;
        let high = expected.as_nanos() as f64 * (1.0 + jitter) + 1.0;
        let got_nanos = got.as_nanos() as f64;
        assert!(
            got_nanos >= low && got_nanos <= high,
            "got {got:?}, expected within ±{jitter} of {expected:?}"
        );
    }

    #[test]
    fn test_fixed_ignores_attempt() {
        let backoff = Backoff::fixed(Duration::from_secs(1));
        assert_eq!(backoff.next(0), Duration::from_secs(1));
        assert_eq!(backoff.next(5), Duration::from_secs(1));
    }

    #[test]
    fn test_fixed_with_jitter_stays_in_range() {
        let backoff = Backoff::fixed(Duration::from_secs(1)).with_jitter(0.2);
        for attempt in 0..50 {
            assert_within(backoff.next(attempt), Duration::from_secs(1), 0.2);
        }
    }

    #[test]
    fn test_linear_schedule_and_cap() {
        let backoff = Backoff::linear(
            Duration::from_secs(1),
            Duration::from_millis(500),
            Duration::from_secs(3),
        );
        assert_eq!(backoff.next(0), Duration::from_secs(1));
        assert_eq!(backoff.next(1), Duration::from_millis(1500));
        assert_eq!(backoff.next(2), Duration::from_secs(2));
        assert_eq!(backoff.next(10), Duration::from_secs(3));
    }

    #[test]
    fn test_linear_with_jitter_stays_in_range() {
        let backoff = Backoff::linear(
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(5),
        )
        .with_jitter(0.1);
        for _ in 0..50 {
            assert_within(backoff.next(2), Duration::from_secs(3), 0.1);
        }
    }

    #[test]
    fn test_exponential_schedule_and_cap() {
        let backoff =
            Backoff::exponential(Duration::from_secs(1), 2.0, Duration::from_secs(10));
        assert_eq!(backoff.next(0), Duration::from_secs(1));
        assert_eq!(backoff.next(1), Duration::from_secs(2));
        assert_eq!(backoff.next(2), Duration::from_secs(4));
        assert_eq!(backoff.next(3), Duration::from_secs(8));
        assert_eq!(backoff.next(4), Duration::from_secs(10));
    }

    #[test]
    fn test_exponential_uncapped_with_jitter() {
        let backoff =
            Backoff::exponential(Duration::from_secs(1), 2.0, Duration::ZERO).with_jitter(0.2);
        for _ in 0..50 {
            assert_within(backoff.next(2), Duration::from_secs(4), 0.2);
        }
    }

    #[test]
    fn test_capped_value_is_jittered_around_max() {
        let max = Duration::from_secs(10);
        let backoff = Backoff::exponential(Duration::from_secs(1), 2.0, max).with_jitter(0.3);
        assert_eq!(backoff.base_delay(20), max);
        for _ in 0..50 {
            assert_within(backoff.next(20), max, 0.3);
        }
    }

    #[test]
    fn test_huge_attempts_saturate_instead_of_overflowing() {
        let max = Duration::from_secs(30);
        let linear = Backoff::linear(Duration::from_secs(1), Duration::from_secs(1), max);
        let exponential = Backoff::exponential(Duration::from_secs(1), 2.0, max);
        assert_eq!(linear.next(u32::MAX), max);
        assert_eq!(exponential.next(u32::MAX), max);

        let uncapped_linear = Backoff::linear(
            Duration::from_secs(u64::MAX / 2),
            Duration::from_secs(u64::MAX / 2),
            Duration::ZERO,
        );
        assert_eq!(uncapped_linear.next(u32::MAX), Duration::MAX);

        let uncapped_exponential =
            Backoff::exponential(Duration::from_secs(1), 10.0, Duration::ZERO).with_jitter(0.5);
        assert_eq!(uncapped_exponential.base_delay(1_000), Duration::MAX);
        assert!(uncapped_exponential.next(1_000) > Duration::from_secs(1));
    }

    #[test]
    fn test_negative_factor_never_waits_forever() {
        let backoff = Backoff::exponential(Duration::from_millis(100), -2.0, Duration::ZERO);
        assert_eq!(backoff.base_delay(0), Duration::from_millis(100));
        assert_eq!(backoff.base_delay(1), Duration::ZERO);
        assert_eq!(backoff.base_delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_cap_holds_for_every_large_attempt() {
        let max = Duration::from_millis(750);
        let linear = Backoff::linear(Duration::from_millis(100), Duration::from_millis(100), max);
        let exponential = Backoff::exponential(Duration::from_millis(100), 3.0, max);
        for attempt in 7..200 {
            assert_eq!(linear.base_delay(attempt), max);
        }
        for attempt in 2..200 {
            assert_eq!(exponential.base_delay(attempt), max);
        }
    }

    #[test]
    fn test_jitter_outside_open_interval_is_noop() {
        let delay = Duration::from_secs(1);
        assert_eq!(apply_jitter(delay, 0.0), delay);
        assert_eq!(apply_jitter(delay, -0.5), delay);
        assert_eq!(apply_jitter(delay, 1.0), delay);
        assert_eq!(apply_jitter(delay, 1.5), delay);
        assert_eq!(apply_jitter(delay, f64::NAN), delay);
    }

    #[test]
    fn test_valid_jitter_bounds() {
        for _ in 0..100 {
            let got = apply_jitter(Duration::from_millis(100), 0.5);
            assert!(got >= Duration::from_millis(50) && got <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_default_is_linear_with_small_jitter() {
        let backoff = Backoff::default();
        assert_eq!(backoff.base_delay(0), Duration::from_secs(1));
        assert_eq!(backoff.base_delay(1), Duration::from_secs(2));
        assert_eq!(backoff.base_delay(50), Duration::from_secs(10));
        assert_eq!(backoff.jitter(), 0.1);
    }
}
