use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::rules::Holiday;

fn is_business_day(day: NaiveDate, holidays: &[NaiveDate]) -> bool {
    !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) && !holidays.contains(&day)
}

fn end_of_month(day: NaiveDate) -> NaiveDate {
    let next_month = day.with_day(28).unwrap() + Duration::days(4);
    next_month - Duration::days(next_month.day() as i64)
}

fn start_of_month(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap()
}

/// Last business day of the month of `day`
fn month_ultimo(day: NaiveDate, holidays: &[NaiveDate]) -> NaiveDate {
    let mut ultimo = end_of_month(day);
    while !is_business_day(ultimo, holidays) {
        ultimo -= Duration::days(1);
    }
    ultimo
}

/// First business day of the month of `day` ("ultimo plus one")
fn month_uplusone(day: NaiveDate, holidays: &[NaiveDate]) -> NaiveDate {
    let mut uplusone = start_of_month(day);
    while !is_business_day(uplusone, holidays) {
        uplusone += Duration::days(1);
    }
    uplusone
}

/// Ultimo of the previous month, relative to its first business day
fn prev_ultimo(uplusone: NaiveDate, holidays: &[NaiveDate]) -> NaiveDate {
    let mut ultimo = uplusone - Duration::days(1);
    while !is_business_day(ultimo, holidays) {
        ultimo -= Duration::days(1);
    }
    ultimo
}

/// Resolves recurring holidays against the year of `day`
fn actual_holidays(day: NaiveDate, holidays: &[Holiday]) -> Vec<NaiveDate> {
    holidays
        .iter()
        .filter_map(|h| NaiveDate::from_ymd_opt(day.year(), h.month, h.day))
        .collect()
}

/// Calculates the posting date for items to clear.
///
/// While the current day still belongs to the closing window of the
/// previous period (on or before the first business day of the month),
/// the previous ultimo is used; once the month's ultimo has passed,
/// the ultimo itself; otherwise the current day.
pub fn clearing_date(today: NaiveDate, holidays: &[Holiday]) -> NaiveDate {
    let off_days = actual_holidays(today, holidays);
    let uplusone = month_uplusone(today, &off_days);
    let ultimo = month_ultimo(today, &off_days);

    if ultimo < today {
        ultimo
    } else if today <= uplusone {
        prev_ultimo(uplusone, &off_days)
    } else {
        today
    }
}
