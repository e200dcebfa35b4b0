use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use chrono::NaiveDate;
use tracing::debug;
use uuid::Uuid;

use super::{LedgerStore, PaymentStore, ScheduleSnapshot};
use crate::{
    errors::{Result, ScheduleError},
    schedule::{RecurrenceRule, ScheduledPayment, Transaction},
};

const TMP_SUFFIX: &str = "tmp";

/// Store that keeps the whole schedule in one JSON document and rewrites it after every
/// mutation. A mutation only becomes visible once the file has been replaced.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    state: Mutex<ScheduleSnapshot>,
}

impl JsonStore {
    /// Opens the document at `path`, starting empty when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = if path.exists() {
            load_snapshot_from_path(&path)?
        } else {
            ScheduleSnapshot::default()
        };
        Ok(Self {
            path,
            state: Mutex::new(snapshot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_payment(&self, payment: ScheduledPayment) -> Result<Uuid> {
        self.mutate(|snapshot| snapshot.add_payment(payment))
    }

    pub fn remove_payment(&self, id: Uuid) -> Result<ScheduledPayment> {
        self.mutate(|snapshot| snapshot.remove_payment(id))
    }

    pub fn add_rule(&self, rule: RecurrenceRule) -> Result<Uuid> {
        self.mutate(|snapshot| snapshot.add_rule(rule))
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

    fn mutate<T>(&self, apply: impl FnOnce(&mut ScheduleSnapshot) -> Result<T>) -> Result<T> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        let output = apply(&mut next)?;
        save_snapshot_to_path(&next, &self.path)?;
        *guard = next;
        Ok(output)
    }

    fn lock(&self) -> Result<MutexGuard<'_, ScheduleSnapshot>> {
        self.state
            .lock()
            .map_err(|_| ScheduleError::Storage("json store lock poisoned".into()))
    }
}

impl PaymentStore for JsonStore {
    fn active_rules(&self) -> Result<Vec<RecurrenceRule>> {
        Ok(self.lock()?.active_rules())
    }

    fn payment(&self, id: Uuid) -> Result<Option<ScheduledPayment>> {
        Ok(self.lock()?.payment(id).cloned())
    }

    fn update_rule(&self, rule: &RecurrenceRule) -> Result<()> {
        self.mutate(|snapshot| snapshot.update_rule(rule))
    }

    fn set_rule_active(&self, id: Uuid, active: bool) -> Result<()> {
        self.mutate(|snapshot| snapshot.set_rule_active(id, active))
    }
}

impl LedgerStore for JsonStore {
    fn find_transaction(&self, payment_id: Uuid, date: NaiveDate) -> Result<Option<Transaction>> {
        Ok(self.lock()?.find_transaction(payment_id, date).cloned())
    }

    fn insert_transaction(&self, transaction: Transaction) -> Result<()> {
        self.mutate(|snapshot| snapshot.insert_transaction(transaction))
    }
}

/// Writes the snapshot by staging it next to the target and renaming it into place.
pub fn save_snapshot_to_path(snapshot: &ScheduleSnapshot, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension(TMP_SUFFIX);
    let json = serde_json::to_string_pretty(snapshot)?;
    let mut file = File::create(&tmp)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), "schedule snapshot written");
    Ok(())
}

pub fn load_snapshot_from_path(path: &Path) -> Result<ScheduleSnapshot> {
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}
