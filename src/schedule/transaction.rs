use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::payment::ScheduledPayment;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Income,
    Expense,
}

/// A ledger entry. Entries created by the reconciler carry the id of their source payment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub title: String,
    pub amount: f64,
    pub kind: TransactionKind,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_payment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Mirrors `payment` into a ledger entry dated at `date`.
    pub fn from_occurrence(
        payment: &ScheduledPayment,
        date: NaiveDate,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: payment.title.clone(),
            amount: payment.amount,
            kind: if payment.is_income {
                TransactionKind::Income
            } else {
                TransactionKind::Expense
            },
            category: payment.category.clone(),
            emoji: payment.emoji.clone(),
            date,
            scheduled_payment_id: Some(payment.id),
            created_at,
        }
    }

    /// Whether this entry materialises `payment_id` on `date`.
    pub fn materializes(&self, payment_id: Uuid, date: NaiveDate) -> bool {
        self.scheduled_payment_id == Some(payment_id) && self.date == date
    }
}
