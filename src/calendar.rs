//! Business-calendar engine: US federal holidays and business-day membership.
//!
//! Holidays are computed per calendar year from their statutory rules, never
//! from a lookup table. Fixed-date holidays are not shifted when they land on
//! a weekend; a Saturday July 4th is an ordinary closed Saturday, not an
//! observed Friday holiday.

use chrono::{Datelike, Days, NaiveDate, Weekday};

/// True when `date` is a weekday and not a US federal holiday.
pub fn is_business_day(date: NaiveDate) -> bool {
    !is_weekend(date) && !is_federal_holiday(date)
}

/// True for Saturday and Sunday.
pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// True when `date` falls in the federal holiday set for its year.
pub fn is_federal_holiday(date: NaiveDate) -> bool {
    federal_holidays(date.year()).contains(&date)
}

/// The eleven US federal holidays for `year`, in calendar order.
pub fn federal_holidays(year: i32) -> Vec<NaiveDate> {
    let mut days = Vec::with_capacity(11);
    // New Year's Day
    days.extend(NaiveDate::from_ymd_opt(year, 1, 1));
    // MLK Day: third Monday of January
    days.extend(nth_weekday_of_month(year, 1, Weekday::Mon, 3));
    // Presidents' Day: third Monday of February
    days.extend(nth_weekday_of_month(year, 2, Weekday::Mon, 3));
    // Memorial Day: last Monday of May
    days.extend(last_weekday_of_month(year, 5, Weekday::Mon));
    // Juneteenth
    days.extend(NaiveDate::from_ymd_opt(year, 6, 19));
    // Independence Day
    days.extend(NaiveDate::from_ymd_opt(year, 7, 4));
    // Labor Day: first Monday of September
    days.extend(nth_weekday_of_month(year, 9, Weekday::Mon, 1));
    // Columbus Day: second Monday of October
    days.extend(nth_weekday_of_month(year, 10, Weekday::Mon, 2));
    // Veterans Day
    days.extend(NaiveDate::from_ymd_opt(year, 11, 11));
    // Thanksgiving: fourth Thursday of November
    days.extend(nth_weekday_of_month(year, 11, Weekday::Thu, 4));
    // Christmas Day
    days.extend(NaiveDate::from_ymd_opt(year, 12, 25));
    days
}

/// Nth occurrence of `weekday` in the given month, if the month has one.
fn nth_weekday_of_month(year: i32, month: u32, weekday: Weekday, nth: u32) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let offset =
        (7 + weekday.num_days_from_monday() - first.weekday().num_days_from_monday()) % 7;
    let date = first.checked_add_days(Days::new(u64::from(offset + (nth - 1) * 7)))?;
    (date.month() == month).then_some(date)
}

/// Last occurrence of `weekday` in the given month.
fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let last = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()?;
    let back = (7 + last.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
    last.checked_sub_days(Days::new(u64::from(back)))
}
