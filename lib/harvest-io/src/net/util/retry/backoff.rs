use std::time::Duration;

use rand::Rng as _;

/// An exponential backoff strategy.
///
/// This backoff strategy provides backoff durations that increase exponentially based on a user-provided error count,
/// with a minimum and maximum bound on the duration. Additionally, jitter can be added to the backoff duration in order
/// to help avoiding multiple callers retrying their requests at the same time.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    min_backoff: Duration,
    max_backoff: Duration,
    min_backoff_factor: f64,
}

impl ExponentialBackoff {
    /// Creates a new `ExponentialBackoff` with the given minimum and maximum backoff durations.
    ///
    /// Jitter is not applied to the calculated backoff durations.
    pub fn new(min_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            min_backoff,
            max_backoff,
            min_backoff_factor: 1.0,
        }
    }

    /// Creates a new `ExponentialBackoff` with the given minimum and maximum backoff durations, and minimum backoff
    /// factor.
    ///
    /// Jitter is applied to the calculated backoff durations based on the minimum backoff factor, such that any given
    /// backoff duration will be between `D/min_backoff_factor` and `D`, where `D` is the calculated backoff duration
    /// for the given error count. If the minimum backoff factor is set to 1.0 or less, then jitter will be disabled.
    pub fn with_jitter(min_backoff: Duration, max_backoff: Duration, min_backoff_factor: f64) -> Self {
        Self {
            min_backoff,
            max_backoff,
            min_backoff_factor: min_backoff_factor.max(1.0),
        }
    }

    /// Returns the minimum backoff duration.
    pub fn min_backoff(&self) -> Duration {
        self.min_backoff
    }

    /// Returns the maximum backoff duration.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Calculates the backoff duration for the given error count.
    ///
    /// The error count should be the number of consecutive errors, or attempts, that have been made when retrying an
    /// operation or request.
    pub fn get_backoff_duration(&self, error_count: u32) -> Duration {
        if error_count == 0 {
            return self.min_backoff;
        }

        let mut backoff = self.min_backoff.saturating_mul(2u32.saturating_pow(error_count));

        if self.min_backoff_factor > 1.0 {
            let backoff_lower = backoff.div_f64(self.min_backoff_factor);
            let backoff_upper = backoff;
            backoff = rand::rng().random_range(backoff_lower..=backoff_upper);
        }

        backoff.clamp(self.min_backoff, self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;

    use super::ExponentialBackoff;

    fn arb_exponential_backoff(min_backoff_factor: f64) -> impl Strategy<Value = ExponentialBackoff> {
        (1u64..=u32::MAX as u64, 1u64..u32::MAX as u64).prop_map(move |(min_backoff, max_backoff)| {
            let max_backoff = min_backoff.saturating_add(max_backoff);
            ExponentialBackoff::with_jitter(
                Duration::from_nanos(min_backoff),
                Duration::from_nanos(max_backoff),
                min_backoff_factor,
            )
        })
    }

    #[test]
    fn submission_schedule() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(50), Duration::from_secs(1));
        let schedule = (1..=6)
            .map(|count| backoff.get_backoff_duration(count))
            .collect::<Vec<_>>();

        assert_eq!(
            schedule,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_secs(1),
                Duration::from_secs(1),
            ]
        );
    }

    proptest! {
        #[test]
        fn property_test_exponential_backoff_no_jitter(
            backoff in arb_exponential_backoff(1.0),
            error_count in 0..u32::MAX,
            error_count_increase in 1..5u32
        ) {
            let first = backoff.get_backoff_duration(error_count);
            let first_followup = backoff.get_backoff_duration(error_count);
            let second = backoff.get_backoff_duration(error_count.saturating_add(error_count_increase));

            prop_assert_eq!(first, first_followup);
            prop_assert!(first <= second);
            prop_assert!(first >= backoff.min_backoff());
            prop_assert!(second <= backoff.max_backoff());
        }

        #[test]
        fn property_test_exponential_backoff_jitter_bounded(
            backoff in arb_exponential_backoff(2.0),
            error_count in 0..u32::MAX,
        ) {
            let duration = backoff.get_backoff_duration(error_count);

            prop_assert!(duration >= backoff.min_backoff());
            prop_assert!(duration <= backoff.max_backoff());
        }
    }
}
