use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Result, ScheduleError};

/// A payment template the user expects to settle on its due date, optionally repeating.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledPayment {
    pub id: Uuid,
    pub title: String,
    pub amount: f64,
    #[serde(default)]
    pub is_income: bool,
    #[serde(default)]
    pub is_recurring: bool,
    /// Free-text frequency label, only consulted when a recurring payment has no rules.
    #[serde(default)]
    pub frequency: String,
    /// Anchor date: the first occurrence of a recurring payment.
    pub due_date: NaiveDate,
    #[serde(default)]
    pub is_paid: bool,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledPayment {
    /// Creates a one-off, unpaid expense.
    pub fn new(title: impl Into<String>, amount: f64, due_date: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            amount,
            is_income: false,
            is_recurring: false,
            frequency: String::new(),
            due_date,
            is_paid: false,
            category: String::new(),
            emoji: None,
            created_at: Utc::now(),
        }
    }

    pub fn recurring(mut self, frequency: impl Into<String>) -> Self {
        self.is_recurring = true;
        self.frequency = frequency.into();
        self
    }

    pub fn income(mut self) -> Self {
        self.is_income = true;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_emoji(mut self, emoji: impl Into<String>) -> Self {
        self.emoji = Some(emoji.into());
        self
    }

    pub fn mark_paid(&mut self) {
        self.is_paid = true;
    }

    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(ScheduleError::Validation(
                "scheduled payment title cannot be empty".into(),
            ));
        }
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(ScheduleError::Validation(format!(
                "scheduled payment amount must be positive, got {}",
                self.amount
            )));
        }
        Ok(())
    }
}

/// A concrete due date derived from a scheduled payment. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedOccurrence<'a> {
    pub payment: &'a ScheduledPayment,
    pub date: NaiveDate,
}
