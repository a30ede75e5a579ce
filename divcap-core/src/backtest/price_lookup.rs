//! Fill-price lookup with a bounded forward search.

use chrono::{Days, NaiveDate};

use crate::domain::PriceSeries;
use crate::error::CaptureError;

/// Candidate dates searched: the target and the four days after it.
pub const FORWARD_WINDOW_DAYS: u32 = 5;

/// Close on the first trading day in `[target, target + 4]`, if any.
///
/// Never searches backward: the earliest fill on or after the intended date.
pub fn closest_price(series: &PriceSeries, target: NaiveDate) -> Option<f64> {
    (0..u64::from(FORWARD_WINDOW_DAYS))
        .filter_map(|offset| target.checked_add_days(Days::new(offset)))
        .find_map(|date| series.close_on(date))
}

/// `closest_price` as a `Result`, for callers that report the miss.
pub fn fill_price(series: &PriceSeries, target: NaiveDate) -> Result<f64, CaptureError> {
    closest_price(series, target).ok_or(CaptureError::MissingPrice {
        date: target,
        window_days: FORWARD_WINDOW_DAYS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PricePoint;
    use proptest::prelude::*;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, m, day).unwrap()
    }

    fn series(points: &[(NaiveDate, f64)]) -> PriceSeries {
        PriceSeries::from_points("X", points.iter().map(|(d, c)| (*d, PricePoint::new(*c, *c))))
    }

    #[test]
    fn exact_date_wins() {
        let s = series(&[(d(6, 1), 10.0), (d(6, 2), 11.0)]);
        assert_eq!(closest_price(&s, d(6, 1)), Some(10.0));
    }

    #[test]
    fn skips_weekend_forward() {
        // Saturday 2023-06-03 -> Monday 2023-06-05
        let s = series(&[(d(6, 2), 10.0), (d(6, 5), 10.5)]);
        assert_eq!(closest_price(&s, d(6, 3)), Some(10.5));
    }

    #[test]
    fn last_candidate_is_target_plus_four() {
        let s = series(&[(d(6, 5), 12.0)]);
        assert_eq!(closest_price(&s, d(6, 1)), Some(12.0));
        let s = series(&[(d(6, 6), 12.0)]);
        assert_eq!(closest_price(&s, d(6, 1)), None);
    }

    #[test]
    fn never_looks_backward() {
        let s = series(&[(d(5, 31), 9.0)]);
        assert!(matches!(
            fill_price(&s, d(6, 1)),
            Err(CaptureError::MissingPrice { window_days: 5, .. })
        ));
    }

    proptest! {
        #[test]
        fn result_comes_from_window(gap in 0u64..12, day in 1u32..28) {
            let target = NaiveDate::from_ymd_opt(2023, 3, day).unwrap();
            let present = target + Days::new(gap);
            let s = series(&[(present, 42.0)]);
            let found = closest_price(&s, target);
            if gap < u64::from(FORWARD_WINDOW_DAYS) {
                prop_assert_eq!(found, Some(42.0));
            } else {
                prop_assert_eq!(found, None);
            }
        }
    }
}
