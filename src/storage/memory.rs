use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use uuid::Uuid;

use super::{LedgerStore, PaymentStore, ScheduleSnapshot};
use crate::{
    errors::{Result, ScheduleError},
    schedule::{RecurrenceRule, ScheduledPayment, Transaction},
};

/// Process-local store. Every operation runs under one lock, which also makes the ledger's
/// duplicate check and insert a single critical section.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<ScheduleSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: ScheduleSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
        }
    }

    pub fn add_payment(&self, payment: ScheduledPayment) -> Result<Uuid> {
        self.lock()?.add_payment(payment)
    }

    pub fn remove_payment(&self, id: Uuid) -> Result<ScheduledPayment> {
        self.lock()?.remove_payment(id)
    }

    pub fn add_rule(&self, rule: RecurrenceRule) -> Result<Uuid> {
        self.lock()?.add_rule(rule)
    }

    pub fn rule(&self, id: Uuid) -> Result<Option<RecurrenceRule>> {
        Ok(self.lock()?.rule(id).cloned())
    }

    pub fn rules_for(&self, payment_id: Uuid) -> Result<Vec<RecurrenceRule>> {
        Ok(self.lock()?.rules_for(payment_id))
    }

    pub fn transactions(&self) -> Result<Vec<Transaction>> {
        Ok(self.lock()?.transactions.clone())
    }

    pub fn snapshot(&self) -> Result<ScheduleSnapshot> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, ScheduleSnapshot>> {
        self.state
            .lock()
            .map_err(|_| ScheduleError::Storage("memory store lock poisoned".into()))
    }
}

impl PaymentStore for MemoryStore {
    fn active_rules(&self) -> Result<Vec<RecurrenceRule>> {
        Ok(self.lock()?.active_rules())
    }

    fn payment(&self, id: Uuid) -> Result<Option<ScheduledPayment>> {
        Ok(self.lock()?.payment(id).cloned())
    }

    fn update_rule(&self, rule: &RecurrenceRule) -> Result<()> {
        self.lock()?.update_rule(rule)
    }

    fn set_rule_active(&self, id: Uuid, active: bool) -> Result<()> {
        self.lock()?.set_rule_active(id, active)
    }
}

impl LedgerStore for MemoryStore {
    fn find_transaction(&self, payment_id: Uuid, date: NaiveDate) -> Result<Option<Transaction>> {
        Ok(self.lock()?.find_transaction(payment_id, date).cloned())
    }

    fn insert_transaction(&self, transaction: Transaction) -> Result<()> {
        self.lock()?.insert_transaction(transaction)
    }
}
