mod common;

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    mpsc::{self, Receiver, Sender},
    Arc, Mutex,
};
use std::thread;

use chrono::NaiveDate;
use common::{date, recurring_payment, rule_for};
use schedule_core::{
    reconcile::{next_occurrence, RecurrenceReconciler, RuleStatus},
    schedule::{RecurrenceRule, RecurrenceType, ScheduledPayment, Transaction, TransactionKind},
    storage::{LedgerStore, MemoryStore, PaymentStore, ScheduleSnapshot},
    time::FixedClock,
    Result, ScheduleError,
};
use uuid::Uuid;

fn reconciler(store: &Arc<MemoryStore>, today: NaiveDate) -> RecurrenceReconciler {
    RecurrenceReconciler::new(store.clone(), store.clone())
        .with_clock(Arc::new(FixedClock::new(today)))
}

fn seeded(payment: ScheduledPayment, rule: RecurrenceRule) -> (Arc<MemoryStore>, Uuid) {
    let store = Arc::new(MemoryStore::new());
    store.add_payment(payment).expect("add payment");
    let rule_id = store.add_rule(rule).expect("add rule");
    (store, rule_id)
}

#[test]
fn due_occurrence_becomes_a_transaction() {
    let payment = recurring_payment("Rent", 1200.0, date(2024, 1, 15)).with_emoji("🏠");
    let rule = rule_for(&payment, RecurrenceType::Monthly);
    let payment_id = payment.id;
    let (store, rule_id) = seeded(payment, rule);

    let report = reconciler(&store, date(2024, 1, 20)).run_pass().unwrap();

    assert_eq!(report.created_count(), 1);
    assert_eq!(report.rules[0].created, vec![date(2024, 1, 15)]);
    assert_eq!(
        report.rules[0].status,
        RuleStatus::Active {
            next_due: date(2024, 2, 15)
        }
    );

    let transactions = store.transactions().unwrap();
    assert_eq!(transactions.len(), 1);
    let txn = &transactions[0];
    assert_eq!(txn.title, "Rent");
    assert_eq!(txn.amount, 1200.0);
    assert_eq!(txn.kind, TransactionKind::Expense);
    assert_eq!(txn.category, "Bills");
    assert_eq!(txn.emoji.as_deref(), Some("🏠"));
    assert_eq!(txn.date, date(2024, 1, 15));
    assert_eq!(txn.scheduled_payment_id, Some(payment_id));

    let rule = store.rule(rule_id).unwrap().unwrap();
    assert_eq!(rule.current_occurrences, 1);
    assert_eq!(rule.last_generated, Some(date(2024, 1, 15)));
    assert!(rule.is_active);
}

#[test]
fn income_payments_produce_income_transactions() {
    let payment = recurring_payment("Salary", 3000.0, date(2024, 2, 1)).income();
    let rule = rule_for(&payment, RecurrenceType::Monthly);
    let (store, _) = seeded(payment, rule);

    reconciler(&store, date(2024, 2, 1)).run_pass().unwrap();

    let transactions = store.transactions().unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].kind, TransactionKind::Income);
}

#[test]
fn nothing_happens_before_the_first_due_date() {
    let payment = recurring_payment("Rent", 1200.0, date(2024, 1, 15));
    let rule = rule_for(&payment, RecurrenceType::Monthly);
    let (store, rule_id) = seeded(payment, rule);

    let report = reconciler(&store, date(2024, 1, 14)).run_pass().unwrap();

    assert_eq!(report.created_count(), 0);
    assert_eq!(
        report.rules[0].status,
        RuleStatus::Active {
            next_due: date(2024, 1, 15)
        }
    );
    assert!(store.transactions().unwrap().is_empty());
    assert_eq!(store.rule(rule_id).unwrap().unwrap().current_occurrences, 0);
}

#[test]
fn repeated_passes_on_the_same_day_create_nothing_new() {
    let payment = recurring_payment("Rent", 1200.0, date(2024, 1, 15));
    let rule = rule_for(&payment, RecurrenceType::Monthly);
    let (store, rule_id) = seeded(payment, rule);
    let reconciler = reconciler(&store, date(2024, 1, 15));

    let first = reconciler.run_pass().unwrap();
    let second = reconciler.run_pass().unwrap();

    assert_eq!(first.created_count(), 1);
    assert_eq!(second.created_count(), 0);
    assert_eq!(second.recovered_count(), 0);
    assert_eq!(store.transactions().unwrap().len(), 1);
    assert_eq!(store.rule(rule_id).unwrap().unwrap().current_occurrences, 1);
}

#[test]
fn existing_transaction_only_advances_the_rule() {
    let payment = recurring_payment("Rent", 1200.0, date(2024, 1, 15));
    let rule = rule_for(&payment, RecurrenceType::Monthly);
    let existing = Transaction::from_occurrence(&payment, date(2024, 1, 15), chrono::Utc::now());
    let (store, rule_id) = seeded(payment, rule);
    store.insert_transaction(existing).unwrap();

    let report = reconciler(&store, date(2024, 3, 1))
        .with_catch_up_limit(12)
        .run_pass()
        .unwrap();

    assert_eq!(report.rules[0].recovered, vec![date(2024, 1, 15)]);
    assert!(report.rules[0].created.is_empty(), "recovery ends the rule's pass");
    assert_eq!(store.transactions().unwrap().len(), 1);
    let rule = store.rule(rule_id).unwrap().unwrap();
    assert_eq!(rule.current_occurrences, 1);
    assert_eq!(rule.last_generated, Some(date(2024, 1, 15)));
}

#[test]
fn ledger_refuses_duplicate_occurrences() {
    let payment = recurring_payment("Rent", 1200.0, date(2024, 1, 15));
    let store = MemoryStore::new();
    let first = Transaction::from_occurrence(&payment, date(2024, 1, 15), chrono::Utc::now());
    let second = Transaction::from_occurrence(&payment, date(2024, 1, 15), chrono::Utc::now());

    store.insert_transaction(first).unwrap();
    let err = store.insert_transaction(second).unwrap_err();

    assert!(matches!(err, ScheduleError::DuplicateOccurrence { .. }));
    assert!(store
        .find_transaction(payment.id, date(2024, 1, 15))
        .unwrap()
        .is_some());
}

#[test]
fn catch_up_limit_bounds_backlog_per_pass() {
    let payment = recurring_payment("Rent", 1200.0, date(2024, 1, 15));
    let rule = rule_for(&payment, RecurrenceType::Monthly);
    let (store, _) = seeded(payment, rule);
    let today = date(2024, 4, 20);

    let one_at_a_time = reconciler(&store, today);
    assert_eq!(
        one_at_a_time.run_pass().unwrap().rules[0].created,
        vec![date(2024, 1, 15)]
    );
    assert_eq!(
        one_at_a_time.run_pass().unwrap().rules[0].created,
        vec![date(2024, 2, 15)]
    );

    let report = reconciler(&store, today)
        .with_catch_up_limit(12)
        .run_pass()
        .unwrap();
    assert_eq!(
        report.rules[0].created,
        vec![date(2024, 3, 15), date(2024, 4, 15)]
    );
    assert_eq!(
        report.rules[0].status,
        RuleStatus::Active {
            next_due: date(2024, 5, 15)
        }
    );
    assert_eq!(store.transactions().unwrap().len(), 4);
}

#[test]
fn rule_retires_once_max_occurrences_are_materialized() {
    let payment = recurring_payment("Installment", 50.0, date(2024, 1, 1));
    let rule = rule_for(&payment, RecurrenceType::Daily).with_max_occurrences(2);
    let (store, rule_id) = seeded(payment, rule);
    let reconciler = reconciler(&store, date(2024, 1, 31)).with_catch_up_limit(10);

    let report = reconciler.run_pass().unwrap();

    assert_eq!(
        report.rules[0].created,
        vec![date(2024, 1, 1), date(2024, 1, 2)]
    );
    assert_eq!(report.rules[0].status, RuleStatus::Retired);
    let rule = store.rule(rule_id).unwrap().unwrap();
    assert!(!rule.is_active);
    assert_eq!(rule.current_occurrences, 2);

    let next = reconciler.run_pass().unwrap();
    assert!(next.rules.is_empty(), "inactive rules are not loaded again");
    assert_eq!(store.transactions().unwrap().len(), 2);
}

#[test]
fn rule_past_its_end_date_is_retired_without_transactions() {
    let payment = recurring_payment("Lessons", 35.0, date(2024, 1, 1));
    let rule = rule_for(&payment, RecurrenceType::Daily).with_end_date(date(2024, 1, 10));
    let (store, rule_id) = seeded(payment, rule);

    let report = reconciler(&store, date(2024, 1, 20)).run_pass().unwrap();

    assert_eq!(report.retired_count(), 1);
    assert!(store.transactions().unwrap().is_empty());
    assert!(!store.rule(rule_id).unwrap().unwrap().is_active);
}

#[test]
fn rule_with_no_occurrence_left_before_its_end_date_is_retired() {
    let payment = recurring_payment("Lessons", 35.0, date(2024, 1, 1));
    let mut rule = rule_for(&payment, RecurrenceType::Weekly).with_end_date(date(2024, 1, 20));
    rule.current_occurrences = 3;
    rule.last_generated = Some(date(2024, 1, 15));
    let (store, rule_id) = seeded(payment, rule);

    let report = reconciler(&store, date(2024, 1, 19)).run_pass().unwrap();

    assert_eq!(report.rules[0].status, RuleStatus::Retired);
    assert!(store.transactions().unwrap().is_empty());
    let rule = store.rule(rule_id).unwrap().unwrap();
    assert!(!rule.is_active);
    assert!(rule.last_generated <= rule.end_date);
}

#[test]
fn rule_for_a_missing_payment_is_skipped_and_others_continue() {
    let payment = recurring_payment("Rent", 1200.0, date(2024, 1, 15));
    let valid = rule_for(&payment, RecurrenceType::Monthly);
    let orphan = RecurrenceRule::new(Uuid::new_v4(), RecurrenceType::Monthly);
    let orphan_id = orphan.id;
    let store = Arc::new(MemoryStore::from_snapshot(ScheduleSnapshot {
        payments: vec![payment],
        rules: vec![orphan, valid],
        transactions: Vec::new(),
    }));

    let report = reconciler(&store, date(2024, 1, 15)).run_pass().unwrap();

    assert_eq!(report.rules.len(), 2);
    assert_eq!(report.rules[0].status, RuleStatus::MissingPayment);
    assert_eq!(report.created_count(), 1);
    assert!(!report.needs_retry());
    assert!(store.rule(orphan_id).unwrap().unwrap().is_active);
}

#[test]
fn one_off_payments_do_not_accept_rules() {
    let payment = ScheduledPayment::new("Concert", 80.0, date(2024, 1, 15));
    let rule = rule_for(&payment, RecurrenceType::Monthly);
    let store = MemoryStore::new();
    store.add_payment(payment).unwrap();

    assert!(matches!(
        store.add_rule(rule),
        Err(ScheduleError::Validation(_))
    ));
}

#[test]
fn rule_on_a_one_off_payment_is_retired_without_transactions() {
    let payment = ScheduledPayment::new("Concert", 80.0, date(2024, 1, 15));
    let rule = rule_for(&payment, RecurrenceType::Monthly);
    let rule_id = rule.id;
    let store = Arc::new(MemoryStore::from_snapshot(ScheduleSnapshot {
        payments: vec![payment],
        rules: vec![rule],
        transactions: Vec::new(),
    }));

    let report = reconciler(&store, date(2024, 4, 20))
        .with_catch_up_limit(12)
        .run_pass()
        .unwrap();

    assert_eq!(report.rules[0].status, RuleStatus::Retired);
    assert_eq!(report.created_count(), 0);
    assert!(store.transactions().unwrap().is_empty());
    let rule = store.rule(rule_id).unwrap().unwrap();
    assert!(!rule.is_active);
    assert_eq!(rule.current_occurrences, 0);
}

#[test]
fn next_occurrence_resumes_after_last_generated() {
    let payment = recurring_payment("Rent", 1200.0, date(2024, 1, 31));
    let mut rule = rule_for(&payment, RecurrenceType::Monthly);
    assert_eq!(next_occurrence(&rule, &payment), Some(date(2024, 1, 31)));

    rule.last_generated = Some(date(2024, 1, 31));
    assert_eq!(next_occurrence(&rule, &payment), Some(date(2024, 2, 29)));

    rule.last_generated = Some(date(2024, 2, 29));
    assert_eq!(next_occurrence(&rule, &payment), Some(date(2024, 3, 31)));

    rule.last_generated = Some(date(2023, 12, 31));
    assert_eq!(
        next_occurrence(&rule, &payment),
        Some(date(2024, 1, 31)),
        "a due date moved forward restarts the series there"
    );
}

/// Wraps a memory store and fails selected operations on demand.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    failing_updates: AtomicUsize,
    unavailable: AtomicBool,
}

impl PaymentStore for FlakyStore {
    fn active_rules(&self) -> Result<Vec<RecurrenceRule>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ScheduleError::Storage("database is locked".into()));
        }
        self.inner.active_rules()
    }

    fn payment(&self, id: Uuid) -> Result<Option<ScheduledPayment>> {
        self.inner.payment(id)
    }

    fn update_rule(&self, rule: &RecurrenceRule) -> Result<()> {
        if self.failing_updates.load(Ordering::SeqCst) > 0 {
            self.failing_updates.fetch_sub(1, Ordering::SeqCst);
            return Err(ScheduleError::Storage("disk full".into()));
        }
        self.inner.update_rule(rule)
    }

    fn set_rule_active(&self, id: Uuid, active: bool) -> Result<()> {
        self.inner.set_rule_active(id, active)
    }
}

impl LedgerStore for FlakyStore {
    fn find_transaction(&self, payment_id: Uuid, date: NaiveDate) -> Result<Option<Transaction>> {
        self.inner.find_transaction(payment_id, date)
    }

    fn insert_transaction(&self, transaction: Transaction) -> Result<()> {
        self.inner.insert_transaction(transaction)
    }
}

#[test]
fn failed_rule_update_is_repaired_on_the_next_pass() {
    let payment = recurring_payment("Rent", 1200.0, date(2024, 1, 15));
    let rule = rule_for(&payment, RecurrenceType::Monthly);
    let rule_id = rule.id;
    let store = Arc::new(FlakyStore::default());
    store.inner.add_payment(payment).unwrap();
    store.inner.add_rule(rule).unwrap();
    store.failing_updates.store(1, Ordering::SeqCst);
    let reconciler = RecurrenceReconciler::new(store.clone(), store.clone())
        .with_clock(Arc::new(FixedClock::new(date(2024, 1, 20))));

    let first = reconciler.run_pass().unwrap();
    assert!(matches!(
        first.rules[0].status,
        RuleStatus::Failed {
            retryable: true,
            ..
        }
    ));
    assert!(first.needs_retry());
    assert_eq!(store.inner.transactions().unwrap().len(), 1);
    assert_eq!(
        store.inner.rule(rule_id).unwrap().unwrap().current_occurrences,
        0
    );

    let second = reconciler.run_pass().unwrap();
    assert_eq!(second.rules[0].recovered, vec![date(2024, 1, 15)]);
    assert!(!second.needs_retry());
    assert_eq!(store.inner.transactions().unwrap().len(), 1);
    let rule = store.inner.rule(rule_id).unwrap().unwrap();
    assert_eq!(rule.current_occurrences, 1);
    assert_eq!(rule.last_generated, Some(date(2024, 1, 15)));
}

#[test]
fn unavailable_storage_fails_the_whole_pass() {
    let store = Arc::new(FlakyStore::default());
    store.unavailable.store(true, Ordering::SeqCst);
    let reconciler = RecurrenceReconciler::new(store.clone(), store.clone())
        .with_clock(Arc::new(FixedClock::new(date(2024, 1, 20))));

    let err = reconciler.run_pass().unwrap_err();

    assert!(err.is_retryable());

    store.unavailable.store(false, Ordering::SeqCst);
    assert!(reconciler.run_pass().is_ok(), "the guard is released after a failure");
}

/// Blocks inside `active_rules` until released, to hold a pass open.
struct GatedStore {
    inner: MemoryStore,
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
    gated: AtomicBool,
}

impl PaymentStore for GatedStore {
    fn active_rules(&self) -> Result<Vec<RecurrenceRule>> {
        if self.gated.swap(false, Ordering::SeqCst) {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv();
        }
        self.inner.active_rules()
    }

    fn payment(&self, id: Uuid) -> Result<Option<ScheduledPayment>> {
        self.inner.payment(id)
    }

    fn update_rule(&self, rule: &RecurrenceRule) -> Result<()> {
        self.inner.update_rule(rule)
    }

    fn set_rule_active(&self, id: Uuid, active: bool) -> Result<()> {
        self.inner.set_rule_active(id, active)
    }
}

impl LedgerStore for GatedStore {
    fn find_transaction(&self, payment_id: Uuid, date: NaiveDate) -> Result<Option<Transaction>> {
        self.inner.find_transaction(payment_id, date)
    }

    fn insert_transaction(&self, transaction: Transaction) -> Result<()> {
        self.inner.insert_transaction(transaction)
    }
}

#[test]
fn overlapping_pass_is_refused() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let store = Arc::new(GatedStore {
        inner: MemoryStore::new(),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
        gated: AtomicBool::new(true),
    });
    let payment = recurring_payment("Rent", 1200.0, date(2024, 1, 15));
    let rule = rule_for(&payment, RecurrenceType::Monthly);
    store.inner.add_payment(payment).unwrap();
    store.inner.add_rule(rule).unwrap();
    let reconciler = Arc::new(
        RecurrenceReconciler::new(store.clone(), store.clone())
            .with_clock(Arc::new(FixedClock::new(date(2024, 1, 15)))),
    );

    let background = {
        let reconciler = Arc::clone(&reconciler);
        thread::spawn(move || reconciler.run_pass())
    };
    entered_rx.recv().unwrap();

    let overlapped = reconciler.run_pass().unwrap();
    assert!(overlapped.overlapped);
    assert!(overlapped.rules.is_empty());

    release_tx.send(()).unwrap();
    let finished = background.join().unwrap().unwrap();
    assert!(!finished.overlapped);
    assert_eq!(finished.created_count(), 1);
    assert_eq!(store.inner.transactions().unwrap().len(), 1);
}
