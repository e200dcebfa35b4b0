#![doc(test(attr(deny(warnings))))]

//! Schedule Core expands scheduled payments into due dates and reconciles due occurrences
//! into ledger transactions.

pub mod config;
pub mod errors;
pub mod reconcile;
pub mod schedule;
pub mod storage;
pub mod time;
pub mod utils;

pub use errors::{Result, ScheduleError};

/// Initializes global tracing with the crate defaults and emits a startup log.
pub fn init() {
    init_with_filter(None);
}

/// Like [`init`], with extra `EnvFilter` directives used when `RUST_LOG` is unset.
pub fn init_with_filter(directives: Option<&str>) {
    utils::init_tracing(directives);
    tracing::debug!("Schedule Core tracing initialized.");
}
