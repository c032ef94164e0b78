use time::Duration;

use crate::{Series, UtcDateTime};

/// Reads a series at arbitrary instants.
///
/// Between observations the value is linearly interpolated. Outside the
/// observed range the nearest endpoint is used as long as the query is within
/// `past_limit` before the first point or `future_limit` after the last one;
/// anything further out is `NaN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interpolator {
    past_limit: Duration,
    future_limit: Duration,
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new(Duration::days(4), Duration::days(4))
    }
}

impl Interpolator {
    pub const fn new(past_limit: Duration, future_limit: Duration) -> Self {
        Self {
            past_limit,
            future_limit,
        }
    }

    /// Limits given as std durations; values beyond `time::Duration::MAX`
    /// saturate.
    pub fn from_std(past_limit: std::time::Duration, future_limit: std::time::Duration) -> Self {
        Self::new(saturating(past_limit), saturating(future_limit))
    }

    pub const fn past_limit(&self) -> Duration {
        self.past_limit
    }

    pub const fn future_limit(&self) -> Duration {
        self.future_limit
    }

    /// Value of `series` at `at`, or `NaN` when `at` is too far outside it.
    ///
    /// # Panics
    ///
    /// Panics if `series` has fewer than two points. Callers check the length
    /// first and report short series as data errors.
    pub fn value_at(&self, series: &Series, at: UtcDateTime) -> f64 {
        let points = series.points();
        assert!(
            points.len() >= 2,
            "interpolation needs at least two points, got {}",
            points.len()
        );
        debug_assert!(series.is_strictly_increasing(), "series must be strictly increasing");

        let first = &points[0];
        let last = &points[points.len() - 1];

        if at <= first.ts {
            return if first.ts - at <= self.past_limit {
                first.value
            } else {
                f64::NAN
            };
        }
        if at >= last.ts {
            return if at - last.ts <= self.future_limit {
                last.value
            } else {
                f64::NAN
            };
        }

        match series.search(at) {
            Ok(index) => points[index].value,
            Err(index) => {
                // `at` lies strictly inside the range, so 0 < index < len.
                let (before, after) = (&points[index - 1], &points[index]);
                let fraction = (at - before.ts) / (after.ts - before.ts);
                before.value + fraction * (after.value - before.value)
            }
        }
    }
}

fn saturating(duration: std::time::Duration) -> Duration {
    Duration::try_from(duration).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PricePoint;

    fn ts(seconds: i64) -> UtcDateTime {
        UtcDateTime::from_unix_timestamp(1_700_000_000 + seconds).expect("valid timestamp")
    }

    fn series(points: &[(i64, f64)]) -> Series {
        Series::new(
            points
                .iter()
                .map(|(seconds, value)| PricePoint::new(ts(*seconds), *value, 0))
                .collect(),
        )
        .expect("ordered series")
    }

    fn day(days: i64) -> i64 {
        days * 86_400
    }

    #[test]
    fn endpoints_and_midpoint() {
        let series = series(&[(0, 10.0), (day(2), 20.0)]);
        let interpolator = Interpolator::default();

        assert_eq!(interpolator.value_at(&series, ts(0)), 10.0);
        assert_eq!(interpolator.value_at(&series, ts(day(2))), 20.0);
        assert_eq!(interpolator.value_at(&series, ts(day(1))), 15.0);
    }

    #[test]
    fn interpolated_values_stay_between_neighbours() {
        let series = series(&[(0, 30.0), (1_000, 10.0)]);
        let interpolator = Interpolator::default();

        let mut previous = f64::INFINITY;
        for step in 0..=10 {
            let value = interpolator.value_at(&series, ts(step * 100));
            assert!((10.0..=30.0).contains(&value));
            assert!(value <= previous);
            previous = value;
        }
    }

    #[test]
    fn exact_hit_returns_observation() {
        let series = series(&[(0, 1.0), (100, 7.0), (200, 3.0)]);

        assert_eq!(Interpolator::default().value_at(&series, ts(100)), 7.0);
    }

    #[test]
    fn future_limit_is_inclusive() {
        let series = series(&[(0, 1.0), (day(1), 2.0)]);
        let interpolator = Interpolator::default();

        assert_eq!(interpolator.value_at(&series, ts(day(5))), 2.0);
        assert!(interpolator.value_at(&series, ts(day(5) + 1)).is_nan());
    }

    #[test]
    fn past_limit_is_inclusive() {
        let series = series(&[(0, 1.0), (day(1), 2.0)]);
        let interpolator = Interpolator::new(Duration::hours(1), Duration::ZERO);

        assert_eq!(interpolator.value_at(&series, ts(-3_600)), 1.0);
        assert!(interpolator.value_at(&series, ts(-3_601)).is_nan());
        assert!(interpolator.value_at(&series, ts(day(1) + 1)).is_nan());
    }

    #[test]
    fn std_limits_saturate() {
        let interpolator = Interpolator::from_std(std::time::Duration::MAX, std::time::Duration::ZERO);

        assert_eq!(interpolator.past_limit(), Duration::MAX);
        assert_eq!(interpolator.future_limit(), Duration::ZERO);
    }

    #[test]
    #[should_panic(expected = "at least two points")]
    fn single_point_series_is_a_programming_error() {
        let series = series(&[(0, 1.0)]);
        Interpolator::default().value_at(&series, ts(0));
    }
}
