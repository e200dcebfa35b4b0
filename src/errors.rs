use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

/// Error type shared by the calculator, the reconciler, and the bundled stores.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Scheduled payment not found: {0}")]
    PaymentNotFound(Uuid),
    #[error("Recurrence rule not found: {0}")]
    RuleNotFound(Uuid),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Occurrence already materialized for payment {payment_id} on {date}")]
    DuplicateOccurrence { payment_id: Uuid, date: NaiveDate },
    #[error("Persistence error: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ScheduleError>;

impl ScheduleError {
    /// Storage failures are transient from the scheduler's point of view: the whole
    /// pass can be attempted again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScheduleError::Storage(_))
    }
}

impl From<std::io::Error> for ScheduleError {
    fn from(err: std::io::Error) -> Self {
        ScheduleError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ScheduleError {
    fn from(err: serde_json::Error) -> Self {
        ScheduleError::Storage(err.to_string())
    }
}
