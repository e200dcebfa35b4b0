//! Background reconciliation: turns due occurrences into ledger transactions exactly once.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    errors::{Result, ScheduleError},
    schedule::{next_date, RecurrenceRule, ScheduledPayment, Transaction},
    storage::{LedgerStore, PaymentStore},
    time::{Clock, SystemClock},
};

const DEFAULT_CATCH_UP_LIMIT: usize = 1;

/// Where a rule stands after a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleStatus {
    /// Still active; `next_due` is the first occurrence not yet materialised.
    Active { next_due: NaiveDate },
    /// Deactivated during this pass because its end conditions were met.
    Retired,
    /// The rule points at a payment that no longer exists. Left untouched.
    MissingPayment,
    Failed { message: String, retryable: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleReport {
    pub rule_id: Uuid,
    pub payment_id: Uuid,
    /// Occurrences that got a new ledger transaction.
    pub created: Vec<NaiveDate>,
    /// Occurrences that were already in the ledger and only needed counters advanced.
    pub recovered: Vec<NaiveDate>,
    pub status: RuleStatus,
}

impl RuleReport {
    fn new(rule: &RecurrenceRule, status: RuleStatus) -> Self {
        Self {
            rule_id: rule.id,
            payment_id: rule.scheduled_payment_id,
            created: Vec::new(),
            recovered: Vec::new(),
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub today: NaiveDate,
    pub rules: Vec<RuleReport>,
    /// Set when the pass was refused because another pass was still running.
    pub overlapped: bool,
}

impl PassReport {
    pub fn created_count(&self) -> usize {
        self.rules.iter().map(|rule| rule.created.len()).sum()
    }

    pub fn recovered_count(&self) -> usize {
        self.rules.iter().map(|rule| rule.recovered.len()).sum()
    }

    pub fn retired_count(&self) -> usize {
        self.count_status(|status| matches!(status, RuleStatus::Retired))
    }

    pub fn failure_count(&self) -> usize {
        self.count_status(|status| matches!(status, RuleStatus::Failed { .. }))
    }

    /// Whether the external scheduler should run the pass again later.
    pub fn needs_retry(&self) -> bool {
        self.count_status(|status| {
            matches!(status, RuleStatus::Failed { retryable: true, .. })
        }) > 0
    }

    fn count_status(&self, predicate: impl Fn(&RuleStatus) -> bool) -> usize {
        self.rules
            .iter()
            .filter(|rule| predicate(&rule.status))
            .count()
    }
}

/// The next occurrence of `rule` that has not been materialised yet.
///
/// A rule that never generated anything starts at the payment's due date, as does one whose
/// last generated date precedes a due date the user has since moved forward.
pub fn next_occurrence(rule: &RecurrenceRule, payment: &ScheduledPayment) -> Option<NaiveDate> {
    match rule.last_generated {
        Some(last) if last >= payment.due_date => next_date(last, payment.due_date, rule),
        _ => Some(payment.due_date),
    }
}

/// Runs reconciliation passes against a payment store and a ledger store.
pub struct RecurrenceReconciler {
    payments: Arc<dyn PaymentStore>,
    ledger: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    catch_up_limit: usize,
    running: AtomicBool,
}

impl RecurrenceReconciler {
    pub fn new(payments: Arc<dyn PaymentStore>, ledger: Arc<dyn LedgerStore>) -> Self {
        Self {
            payments,
            ledger,
            clock: Arc::new(SystemClock),
            catch_up_limit: DEFAULT_CATCH_UP_LIMIT,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Maximum number of overdue occurrences a single rule may materialise per pass.
    pub fn with_catch_up_limit(mut self, limit: usize) -> Self {
        self.catch_up_limit = limit.max(1);
        self
    }

    /// Executes one pass.
    ///
    /// Failing to load the active rules fails the pass. Failures on individual rules are
    /// recorded in the report and the remaining rules are still processed.
    pub fn run_pass(&self) -> Result<PassReport> {
        let today = self.clock.today();
        let Some(_running) = PassGuard::acquire(&self.running) else {
            warn!(%today, "reconciliation pass already running; skipping");
            return Ok(PassReport {
                today,
                rules: Vec::new(),
                overlapped: true,
            });
        };

        let rules = self.payments.active_rules()?;
        let mut reports = Vec::with_capacity(rules.len());
        for rule in rules {
            let report = match self.reconcile_rule(rule.clone(), today) {
                Ok(report) => report,
                Err(err) => {
                    warn!(rule_id = %rule.id, error = %err, "failed to reconcile rule");
                    RuleReport::new(
                        &rule,
                        RuleStatus::Failed {
                            message: err.to_string(),
                            retryable: err.is_retryable(),
                        },
                    )
                }
            };
            reports.push(report);
        }

        let report = PassReport {
            today,
            rules: reports,
            overlapped: false,
        };
        info!(
            %today,
            rules = report.rules.len(),
            created = report.created_count(),
            recovered = report.recovered_count(),
            retired = report.retired_count(),
            failed = report.failure_count(),
            "reconciliation pass finished"
        );
        Ok(report)
    }

    fn reconcile_rule(&self, mut rule: RecurrenceRule, today: NaiveDate) -> Result<RuleReport> {
        if !rule.is_valid_on(today) {
            self.retire(&rule)?;
            return Ok(RuleReport::new(&rule, RuleStatus::Retired));
        }

        let Some(payment) = self.payments.payment(rule.scheduled_payment_id)? else {
            warn!(
                rule_id = %rule.id,
                payment_id = %rule.scheduled_payment_id,
                "recurrence rule references a missing payment"
            );
            return Ok(RuleReport::new(&rule, RuleStatus::MissingPayment));
        };
        if !payment.is_recurring {
            warn!(
                rule_id = %rule.id,
                payment_id = %payment.id,
                "recurrence rule attached to a one-off payment"
            );
            self.retire(&rule)?;
            return Ok(RuleReport::new(&rule, RuleStatus::Retired));
        }

        let mut report = RuleReport::new(&rule, RuleStatus::Retired);
        let mut budget = self.catch_up_limit;
        loop {
            if !rule.is_valid_on(today) {
                self.retire(&rule)?;
                report.status = RuleStatus::Retired;
                break;
            }
            let next = next_occurrence(&rule, &payment)
                .filter(|date| rule.end_date.map_or(true, |end| *date <= end));
            let Some(next) = next else {
                self.retire(&rule)?;
                report.status = RuleStatus::Retired;
                break;
            };
            if next > today || budget == 0 {
                report.status = RuleStatus::Active { next_due: next };
                break;
            }
            budget -= 1;

            let now = self.clock.now();
            let created = self.materialize(&payment, next, now)?;
            rule.advance(next, now);
            self.payments.update_rule(&rule)?;
            if created {
                debug!(rule_id = %rule.id, date = %next, "materialized occurrence");
                report.created.push(next);
            } else {
                debug!(rule_id = %rule.id, date = %next, "occurrence already in ledger");
                report.recovered.push(next);
                budget = 0;
            }
        }
        Ok(report)
    }

    /// Inserts the ledger transaction for one occurrence. Returns `false` when the ledger
    /// already holds it.
    fn materialize(
        &self,
        payment: &ScheduledPayment,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if self.ledger.find_transaction(payment.id, date)?.is_some() {
            return Ok(false);
        }
        match self
            .ledger
            .insert_transaction(Transaction::from_occurrence(payment, date, now))
        {
            Ok(()) => Ok(true),
            Err(ScheduleError::DuplicateOccurrence { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn retire(&self, rule: &RecurrenceRule) -> Result<()> {
        info!(rule_id = %rule.id, "retiring recurrence rule");
        self.payments.set_rule_active(rule.id, false)
    }
}

/// Marks a pass as running for as long as it is alive.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassGuard(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
