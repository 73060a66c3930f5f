//! US federal holiday calendar for the weekday/weekend/holiday comparison

use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// Federal holidays of `year`, with observed dates for fixed-date holidays
///
/// A fixed-date holiday falling on a Saturday is also observed on the Friday
/// before, one on a Sunday on the Monday after. New Year's Day of the next
/// year observed on December 31 belongs to `year`.
pub fn us_federal_holidays(year: i32) -> BTreeSet<NaiveDate> {
    let mut days = BTreeSet::new();

    let mut fixed = vec![(1, 1), (7, 4), (11, 11), (12, 25)];
    if year >= 2021 {
        fixed.push((6, 19));
    }
    for (month, day) in fixed {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            days.insert(date);
            days.extend(observed(date).filter(|d| d.year() == year));
        }
    }
    if let Some(next_new_year) = NaiveDate::from_ymd_opt(year + 1, 1, 1) {
        days.extend(observed(next_new_year).filter(|d| d.year() == year));
    }

    let floating = [
        (1, Weekday::Mon, 3),  // Martin Luther King Jr. Day
        (2, Weekday::Mon, 3),  // Washington's Birthday
        (9, Weekday::Mon, 1),  // Labor Day
        (10, Weekday::Mon, 2), // Columbus Day
        (11, Weekday::Thu, 4), // Thanksgiving
    ];
    for (month, weekday, n) in floating {
        days.extend(NaiveDate::from_weekday_of_month_opt(year, month, weekday, n));
    }
    // Memorial Day: last Monday of May
    days.extend(
        NaiveDate::from_weekday_of_month_opt(year, 5, Weekday::Mon, 5)
            .or_else(|| NaiveDate::from_weekday_of_month_opt(year, 5, Weekday::Mon, 4)),
    );

    days
}

fn observed(date: NaiveDate) -> Option<NaiveDate> {
    match date.weekday() {
        Weekday::Sat => Some(date - Duration::days(1)),
        Weekday::Sun => Some(date + Duration::days(1)),
        _ => None,
    }
}

/// Union of the federal calendars of every year in `years`
pub fn us_federal_calendar(years: &[i32]) -> BTreeSet<NaiveDate> {
    years.iter().flat_map(|&year| us_federal_holidays(year)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_2024_calendar() {
        let days = us_federal_holidays(2024);
        let expected = [
            date(2024, 1, 1),
            date(2024, 1, 15),
            date(2024, 2, 19),
            date(2024, 5, 27),
            date(2024, 6, 19),
            date(2024, 7, 4),
            date(2024, 9, 2),
            date(2024, 10, 14),
            date(2024, 11, 11),
            date(2024, 11, 28),
            date(2024, 12, 25),
        ];
        assert_eq!(days.into_iter().collect::<Vec<_>>(), expected.to_vec());
    }

    #[test]
    fn test_weekend_holidays_are_observed() {
        let days = us_federal_holidays(2021);
        // Independence Day on a Sunday
        assert!(days.contains(&date(2021, 7, 4)));
        assert!(days.contains(&date(2021, 7, 5)));
        // Christmas on a Saturday
        assert!(days.contains(&date(2021, 12, 24)));
        // New Year's Day 2022 on a Saturday is observed in 2021
        assert!(days.contains(&date(2021, 12, 31)));
        assert!(!us_federal_holidays(2020).contains(&date(2020, 6, 19)));
    }

    #[test]
    fn test_calendar_spans_years() {
        let calendar = us_federal_calendar(&[2024, 2025]);
        assert!(calendar.contains(&date(2024, 12, 25)));
        assert!(calendar.contains(&date(2025, 7, 4)));
        assert!(calendar.contains(&date(2025, 1, 20)));
        assert!(us_federal_calendar(&[]).is_empty());
    }
}
