#![allow(dead_code)]

use std::{path::PathBuf, sync::Mutex};

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use schedule_core::schedule::{RecurrenceRule, RecurrenceType, ScheduledPayment};
use tempfile::TempDir;

/// Holds TempDir guards so temporary folders live for the duration of the test run.
static TEST_DIRS: Lazy<Mutex<Vec<TempDir>>> = Lazy::new(|| Mutex::new(Vec::new()));

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid calendar date")
}

/// Creates an isolated directory that outlives the calling test.
pub fn temp_dir() -> PathBuf {
    let temp = TempDir::new().expect("create temp dir");
    let path = temp.path().to_path_buf();
    TEST_DIRS.lock().expect("lock temp dir registry").push(temp);
    path
}

pub fn recurring_payment(title: &str, amount: f64, due: NaiveDate) -> ScheduledPayment {
    ScheduledPayment::new(title, amount, due)
        .recurring("monthly")
        .with_category("Bills")
}

pub fn rule_for(payment: &ScheduledPayment, kind: RecurrenceType) -> RecurrenceRule {
    RecurrenceRule::new(payment.id, kind)
}

pub fn dates_of(occurrences: &[schedule_core::schedule::PlannedOccurrence<'_>]) -> Vec<NaiveDate> {
    occurrences.iter().map(|occurrence| occurrence.date).collect()
}
