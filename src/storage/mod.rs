pub mod json_backend;
pub mod memory;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    errors::{Result, ScheduleError},
    schedule::{generate_occurrences, PlannedOccurrence, RecurrenceRule, ScheduledPayment, Transaction},
};

pub use json_backend::JsonStore;
pub use memory::MemoryStore;

/// Source of scheduled payments and their recurrence rules.
pub trait PaymentStore: Send + Sync {
    fn active_rules(&self) -> Result<Vec<RecurrenceRule>>;
    fn payment(&self, id: Uuid) -> Result<Option<ScheduledPayment>>;
    fn update_rule(&self, rule: &RecurrenceRule) -> Result<()>;
    fn set_rule_active(&self, id: Uuid, active: bool) -> Result<()>;
}

/// Destination for materialised ledger transactions.
pub trait LedgerStore: Send + Sync {
    fn find_transaction(&self, payment_id: Uuid, date: NaiveDate) -> Result<Option<Transaction>>;

    /// Inserts a transaction. Implementations must refuse a second transaction for the same
    /// scheduled payment and date with [`ScheduleError::DuplicateOccurrence`], as one atomic
    /// check-and-insert.
    fn insert_transaction(&self, transaction: Transaction) -> Result<()>;
}

/// Everything the bundled stores keep: payments, their rules, and the ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    #[serde(default)]
    pub payments: Vec<ScheduledPayment>,
    #[serde(default)]
    pub rules: Vec<RecurrenceRule>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl ScheduleSnapshot {
    pub fn add_payment(&mut self, payment: ScheduledPayment) -> Result<Uuid> {
        payment.validate()?;
        if self.payments.iter().any(|existing| existing.id == payment.id) {
            return Err(ScheduleError::Validation(format!(
                "scheduled payment {} already exists",
                payment.id
            )));
        }
        let id = payment.id;
        self.payments.push(payment);
        Ok(id)
    }

    /// Removes a payment together with its rules. Ledger entries are kept.
    pub fn remove_payment(&mut self, id: Uuid) -> Result<ScheduledPayment> {
        let position = self
            .payments
            .iter()
            .position(|payment| payment.id == id)
            .ok_or(ScheduleError::PaymentNotFound(id))?;
        self.rules.retain(|rule| rule.scheduled_payment_id != id);
        Ok(self.payments.remove(position))
    }

    pub fn add_rule(&mut self, rule: RecurrenceRule) -> Result<Uuid> {
        rule.validate()?;
        let payment = self
            .payment(rule.scheduled_payment_id)
            .ok_or(ScheduleError::PaymentNotFound(rule.scheduled_payment_id))?;
        if !payment.is_recurring {
            return Err(ScheduleError::Validation(format!(
                "scheduled payment {} is not recurring",
                payment.id
            )));
        }
        if self.rules.iter().any(|existing| existing.id == rule.id) {
            return Err(ScheduleError::Validation(format!(
                "recurrence rule {} already exists",
                rule.id
            )));
        }
        let id = rule.id;
        self.rules.push(rule);
        Ok(id)
    }

    pub fn payment(&self, id: Uuid) -> Option<&ScheduledPayment> {
        self.payments.iter().find(|payment| payment.id == id)
    }

    pub fn rule(&self, id: Uuid) -> Option<&RecurrenceRule> {
        self.rules.iter().find(|rule| rule.id == id)
    }

    pub fn rules_for(&self, payment_id: Uuid) -> Vec<RecurrenceRule> {
        self.rules
            .iter()
            .filter(|rule| rule.scheduled_payment_id == payment_id)
            .cloned()
            .collect()
    }

    pub fn active_rules(&self) -> Vec<RecurrenceRule> {
        self.rules.iter().filter(|rule| rule.is_active).cloned().collect()
    }

    pub fn update_rule(&mut self, rule: &RecurrenceRule) -> Result<()> {
        let slot = self
            .rules
            .iter_mut()
            .find(|existing| existing.id == rule.id)
            .ok_or(ScheduleError::RuleNotFound(rule.id))?;
        *slot = rule.clone();
        Ok(())
    }

    pub fn set_rule_active(&mut self, id: Uuid, active: bool) -> Result<()> {
        let rule = self
            .rules
            .iter_mut()
            .find(|rule| rule.id == id)
            .ok_or(ScheduleError::RuleNotFound(id))?;
        rule.is_active = active;
        Ok(())
    }

    pub fn find_transaction(&self, payment_id: Uuid, date: NaiveDate) -> Option<&Transaction> {
        self.transactions
            .iter()
            .find(|txn| txn.materializes(payment_id, date))
    }

    pub fn insert_transaction(&mut self, transaction: Transaction) -> Result<()> {
        if let Some(payment_id) = transaction.scheduled_payment_id {
            if self.find_transaction(payment_id, transaction.date).is_some() {
                return Err(ScheduleError::DuplicateOccurrence {
                    payment_id,
                    date: transaction.date,
                });
            }
        }
        self.transactions.push(transaction);
        Ok(())
    }

    /// Planned occurrences of every payment inside `[start, end]`, ordered by date.
    pub fn upcoming(&self, start: NaiveDate, end: NaiveDate) -> Vec<PlannedOccurrence<'_>> {
        let mut occurrences: Vec<_> = self
            .payments
            .iter()
            .flat_map(|payment| {
                let rules = self.rules_for(payment.id);
                generate_occurrences(payment, &rules, start, end)
            })
            .collect();
        occurrences.sort_by_key(|occurrence| occurrence.date);
        occurrences
    }
}
