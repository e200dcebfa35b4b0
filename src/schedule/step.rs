//! Pure calendar stepping for recurrence rules.

use chrono::{Datelike, Duration, NaiveDate};

use super::rule::{weekday_code, RecurrenceRule, RecurrenceType};

/// Returns the occurrence following `current` for `rule`, where `anchor` is the payment's
/// original due date.
///
/// Returns `None` when the next date cannot be represented.
pub fn next_date(current: NaiveDate, anchor: NaiveDate, rule: &RecurrenceRule) -> Option<NaiveDate> {
    let every = rule.interval.max(1);
    match rule.recurrence_type {
        RecurrenceType::Daily => current.checked_add_signed(Duration::days(every as i64)),
        RecurrenceType::Weekly => match rule.weekdays() {
            Some(days) => next_listed_weekday(current, anchor, days, every),
            None => current.checked_add_signed(Duration::weeks(every as i64)),
        },
        RecurrenceType::Monthly => {
            let months = i32::try_from(every).ok()?;
            let (year, month) = shift_month(current.year(), current.month(), months)?;
            let day = rule.day_of_month.unwrap_or_else(|| anchor.day());
            clamped_date(year, month, day)
        }
        RecurrenceType::Yearly => {
            let year = current.year().checked_add(i32::try_from(every).ok()?)?;
            clamped_date(year, anchor.month(), anchor.day())
        }
    }
}

/// Length in days of the steps taken by rules that advance by a fixed amount, if any.
pub(crate) fn fixed_step_days(rule: &RecurrenceRule) -> Option<i64> {
    let every = rule.interval.max(1) as i64;
    match rule.recurrence_type {
        RecurrenceType::Daily => Some(every),
        RecurrenceType::Weekly if rule.weekdays().is_none() => Some(every * 7),
        _ => None,
    }
}

/// For weekday-list rules whose series started before the week of `start`, returns the first
/// listed day of the earliest eligible week not before that week, with the number of
/// occurrences preceding it in the series.
pub(crate) fn listed_weekday_jump(
    rule: &RecurrenceRule,
    anchor: NaiveDate,
    start: NaiveDate,
) -> Option<(NaiveDate, u64)> {
    if rule.recurrence_type != RecurrenceType::Weekly {
        return None;
    }
    let days = rule.weekdays()?;
    let first = *days.first()?;
    let anchor_week = week_start(anchor);
    let weeks_since_anchor = (week_start(start) - anchor_week).num_days().div_euclid(7);
    if weeks_since_anchor <= 0 {
        return None;
    }

    let every = i64::from(rule.interval.max(1));
    let block = (weeks_since_anchor + every - 1).div_euclid(every);
    let anchor_code = weekday_code(anchor.weekday());
    let rest_of_anchor_week = days.iter().filter(|code| **code > anchor_code).count() as i64;
    let preceding = 1 + rest_of_anchor_week + (block - 1) * days.len() as i64;
    let date = anchor_week
        .checked_add_signed(Duration::weeks(block * every))?
        .checked_add_signed(Duration::days(i64::from(first) - 1))?;
    Some((date, u64::try_from(preceding).ok()?))
}

/// Walks the listed weekdays of the current week, then jumps to the next week that sits a
/// whole number of intervals after the anchor's week.
fn next_listed_weekday(
    current: NaiveDate,
    anchor: NaiveDate,
    days: &[u8],
    every: u32,
) -> Option<NaiveDate> {
    let current_week = week_start(current);
    let current_code = weekday_code(current.weekday());
    if let Some(code) = days.iter().copied().find(|code| *code > current_code) {
        return current_week.checked_add_signed(Duration::days(code as i64 - 1));
    }

    let first = *days.first()?;
    let anchor_week = week_start(anchor);
    let weeks_since_anchor = (current_week - anchor_week).num_days().div_euclid(7);
    let every = every as i64;
    let next_block = (weeks_since_anchor.div_euclid(every) + 1) * every;
    anchor_week
        .checked_add_signed(Duration::weeks(next_block))?
        .checked_add_signed(Duration::days(first as i64 - 1))
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

fn shift_month(year: i32, month: u32, months: i32) -> Option<(i32, u32)> {
    let index = i64::from(year) * 12 + i64::from(month) - 1 + i64::from(months);
    let year = i32::try_from(index.div_euclid(12)).ok()?;
    Some((year, index.rem_euclid(12) as u32 + 1))
}

/// Builds a date, pulling `day` back to the last day of the month when the month is shorter.
pub fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let day = day.clamp(1, days_in_month(year, month)?);
    NaiveDate::from_ymd_opt(year, month, day)
}

pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = shift_month(year, month, 1)?;
    let first_next = NaiveDate::from_ymd_opt(next_year, next_month, 1)?;
    Some(first_next.pred_opt()?.day())
}
