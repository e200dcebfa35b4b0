//! Scheduled payment models, recurrence rules, and occurrence expansion.

pub mod occurrences;
pub mod payment;
pub mod rule;
pub mod step;
pub mod transaction;

pub use occurrences::{expand_rule, generate_occurrences, RuleExpansion, SAFETY_GUARD};
pub use payment::{PlannedOccurrence, ScheduledPayment};
pub use rule::{weekday_code, weekday_from_code, RecurrenceRule, RecurrenceType};
pub use step::next_date;
pub use transaction::{Transaction, TransactionKind};
