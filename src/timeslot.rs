//! Calendar slot bucketing: (month, day) -> 1..48 "slot" ids.
//!
//! Slot 0 is the sentinel "all-time" bucket and is never returned by
//! [`slot_of`]; it is a value callers pass explicitly when they mean
//! "ignore season".

use chrono::NaiveDate;

pub const SLOT_ALL_TIME: u32 = 0;
pub const MIN_SLOT: u32 = 0;
pub const MAX_SLOT: u32 = 48;

/// `(month, quartile)` -> `slot = (month-1)*4 + quartile`, quartile in 1..4.
pub fn slot_of(month: u32, day: u32) -> u32 {
    let q = quartile_of_day(day);
    (month - 1) * 4 + q
}

fn quartile_of_day(day: u32) -> u32 {
    match day {
        1..=7 => 1,
        8..=14 => 2,
        15..=21 => 3,
        _ => 4,
    }
}

/// Inverse of [`slot_of`]'s `(month-1)*4 + quartile` packing. Panics if
/// `slot` is outside `1..=48` — callers must validate against
/// `MIN_SLOT..=MAX_SLOT` first (slot 0 has no month/quartile).
pub fn slot_to_month_quartile(slot: u32) -> (u32, u32) {
    assert!((1..=48).contains(&slot), "slot must be 1..=48, got {slot}");
    let month = (slot - 1) / 4 + 1;
    let quartile = (slot - 1) % 4 + 1;
    (month, quartile)
}

/// Start/end day-of-month for `(month, quartile)`, honoring leap years via
/// `year_for_days`.
pub fn slot_bounds(month: u32, quartile: u32, year_for_days: i32) -> (u32, u32) {
    assert!((1..=4).contains(&quartile), "quartile must be 1..=4");
    assert!((1..=12).contains(&month), "month must be 1..=12");

    let start_day = match quartile {
        1 => 1,
        2 => 8,
        3 => 15,
        _ => 22,
    };

    let last_day_of_month = days_in_month(year_for_days, month);
    let end_day = match quartile {
        1 => 7,
        2 => 14,
        3 => 21,
        _ => last_day_of_month,
    };

    (start_day, end_day)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .expect("valid next-month date");
    let first_of_this = NaiveDate::from_ymd_opt(year, month, 1).expect("valid this-month date");
    (first_of_next - first_of_this).num_days() as u32
}

/// `(start_date, end_date)` inclusive, in `YYYY-MM-DD`, for the upstream
/// date filter. `slot = SLOT_ALL_TIME` with an explicit year collapses to
/// the full calendar year.
pub fn date_window(slot: u32, year: i32) -> (String, String) {
    if slot == SLOT_ALL_TIME {
        return (format!("{year:04}-01-01"), format!("{year:04}-12-31"));
    }
    let (month, quartile) = slot_to_month_quartile(slot);
    let (start_day, end_day) = slot_bounds(month, quartile, year);
    (
        format!("{year:04}-{month:02}-{start_day:02}"),
        format!("{year:04}-{month:02}-{end_day:02}"),
    )
}

pub fn is_valid_slot(slot: u32) -> bool {
    slot <= MAX_SLOT
}
