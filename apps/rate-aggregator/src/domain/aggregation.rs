//! Aggregation Arithmetic
//!
//! Stateless helpers shared by ingestion and the persistence cycle:
//! sample means, hour-boundary rounding and calendar-day offsets.
//!
//! All instants are UTC. Hour rounding therefore never depends on the
//! host timezone.

use chrono::{DateTime, Days, Timelike, Utc};

use super::trade::PriceSample;

/// Arithmetic mean of the sampled prices.
///
/// Returns `None` for an empty slice.
#[must_use]
pub fn average(samples: &[PriceSample]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }

    let sum: f64 = samples.iter().map(|s| s.price).sum();

    #[allow(clippy::cast_precision_loss)]
    let count = samples.len() as f64;

    Some(sum / count)
}

/// Truncate an instant to the start of its hour.
#[must_use]
pub fn round_to_hour(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(instant)
}

/// The instant `days` calendar days before now.
#[must_use]
pub fn days_ago(days: u32) -> DateTime<Utc> {
    days_ago_from(Utc::now(), days)
}

/// The instant `days` calendar days before `now`.
///
/// Saturates at the earliest representable instant.
#[must_use]
pub fn days_ago_from(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now.checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};
    use proptest::prelude::*;
    use test_case::test_case;

    fn samples(prices: &[f64]) -> Vec<PriceSample> {
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| PriceSample::new(*p, i64::try_from(i).unwrap()))
            .collect()
    }

    #[test]
    fn average_of_empty_is_none() {
        assert_eq!(average(&[]), None);
    }

    #[test]
    fn average_of_two_trades() {
        let avg = average(&samples(&[1850.5, 1860.0])).unwrap();
        assert!((avg - 1855.25).abs() < 1e-9);
    }

    #[test]
    fn average_of_single_sample_is_that_price() {
        assert_eq!(average(&samples(&[0.053_12])), Some(0.053_12));
    }

    #[test]
    fn round_to_hour_drops_minutes_and_below() {
        let t = Utc
            .with_ymd_and_hms(2024, 5, 17, 13, 47, 29)
            .unwrap()
            .with_nanosecond(123_456_789)
            .unwrap();
        let rounded = round_to_hour(t);
        assert_eq!(rounded, Utc.with_ymd_and_hms(2024, 5, 17, 13, 0, 0).unwrap());
    }

    #[test_case(2024, 3, 5, 7 => (2024, 2, 27) ; "crosses leap february")]
    #[test_case(2023, 3, 5, 7 => (2023, 2, 26) ; "crosses common february")]
    #[test_case(2024, 1, 3, 7 => (2023, 12, 27) ; "crosses year boundary")]
    #[test_case(2024, 6, 15, 0 => (2024, 6, 15) ; "zero days")]
    fn days_ago_is_calendar_exact(year: i32, month: u32, day: u32, days: u32) -> (i32, u32, u32) {
        let now = Utc.with_ymd_and_hms(year, month, day, 12, 30, 0).unwrap();
        let then = days_ago_from(now, days);
        assert_eq!(then.hour(), 12);
        assert_eq!(then.minute(), 30);
        (then.year(), then.month(), then.day())
    }

    #[test]
    fn days_ago_is_in_the_past() {
        assert!(days_ago(7) < Utc::now());
    }

    proptest! {
        #[test]
        fn average_matches_mean(prices in prop::collection::vec(0.0001f64..1_000_000.0, 1..64)) {
            let expected = prices.iter().sum::<f64>() / prices.len() as f64;
            let actual = average(&samples(&prices)).unwrap();
            prop_assert!((actual - expected).abs() <= expected.abs() * 1e-12);
        }

        #[test]
        fn average_stays_within_bounds(prices in prop::collection::vec(0.0001f64..1_000_000.0, 1..64)) {
            let min = prices.iter().copied().fold(f64::INFINITY, f64::min);
            let max = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let actual = average(&samples(&prices)).unwrap();
            prop_assert!(actual >= min * (1.0 - 1e-12) && actual <= max * (1.0 + 1e-12));
        }

        #[test]
        fn round_to_hour_is_idempotent(secs in 0i64..4_102_444_800, nanos in 0u32..1_000_000_000) {
            let t = DateTime::<Utc>::from_timestamp(secs, nanos).unwrap();
            let once = round_to_hour(t);
            prop_assert_eq!(round_to_hour(once), once);
            prop_assert_eq!(once.minute(), 0);
            prop_assert_eq!(once.second(), 0);
            prop_assert_eq!(once.nanosecond(), 0);
            prop_assert!(once <= t);
            prop_assert!(t - once < chrono::TimeDelta::hours(1));
        }
    }
}
