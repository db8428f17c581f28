//! Declared holidays for the access-hours policy.
//!
//! On weekends and holidays, regular users get the later (13:00) start of
//! their access window. The set is static per process; it is configurable
//! at construction because the community's observed days shift over time.

use chrono::{Datelike, NaiveDate, Weekday};

/// A set of declared holidays.
///
/// Fixed entries are (month, day) pairs observed every year. US
/// Thanksgiving (fourth Thursday of November) is computed, since it has
/// no fixed date.
#[derive(Debug, Clone)]
pub struct HolidayCalendar {
    fixed: Vec<(u32, u32)>,
    observe_thanksgiving: bool,
}

impl HolidayCalendar {
    pub fn new(fixed: Vec<(u32, u32)>, observe_thanksgiving: bool) -> Self {
        HolidayCalendar {
            fixed,
            observe_thanksgiving,
        }
    }

    #[must_use]
    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        if self.fixed.contains(&(date.month(), date.day())) {
            return true;
        }
        self.observe_thanksgiving
            && date.month() == 11
            && date.weekday() == Weekday::Thu
            && (22..=28).contains(&date.day())
    }
}

impl Default for HolidayCalendar {
    /// Winter break (Dec 24 through Jan 1), July 4th, and Thanksgiving.
    fn default() -> Self {
        let mut fixed: Vec<(u32, u32)> = (24..=31).map(|d| (12, d)).collect();
        fixed.push((1, 1));
        fixed.push((7, 4));
        HolidayCalendar::new(fixed, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[rstest]
    #[case(d(2016, 12, 24))]
    #[case(d(2016, 12, 31))]
    #[case(d(2017, 1, 1))]
    #[case(d(2016, 7, 4))]
    #[case(d(2014, 11, 27))] // Thanksgiving 2014
    fn declared_days(#[case] date: NaiveDate) {
        assert!(HolidayCalendar::default().is_holiday(date));
    }

    #[rstest]
    #[case(d(2016, 12, 23))]
    #[case(d(2017, 1, 2))]
    #[case(d(2014, 11, 20))] // a Thursday, but the third one
    #[case(d(2014, 11, 26))] // Wednesday in Thanksgiving week
    fn ordinary_days(#[case] date: NaiveDate) {
        assert!(!HolidayCalendar::default().is_holiday(date));
    }

    #[test]
    fn custom_set() {
        let cal = HolidayCalendar::new(vec![(5, 1)], false);
        assert!(cal.is_holiday(d(2020, 5, 1)));
        assert!(!cal.is_holiday(d(2020, 12, 25)));
        assert!(!cal.is_holiday(d(2020, 11, 26))); // Thanksgiving off
    }
}
