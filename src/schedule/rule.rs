use std::fmt;

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{de::Deserializer, Deserialize, Serialize};
use uuid::Uuid;

use super::payment::ScheduledPayment;
use crate::errors::{Result, ScheduleError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurrenceType {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RecurrenceType {
    /// Maps a free-text frequency label onto a recurrence type.
    ///
    /// English and Turkish spellings are recognised, with or without Turkish diacritics.
    /// The mapping is total: anything unrecognised is treated as monthly.
    pub fn from_frequency_label(label: &str) -> RecurrenceType {
        let folded = fold_label(label);
        match folded.as_str() {
            "daily" | "day" | "every day" | "gunluk" | "her gun" => RecurrenceType::Daily,
            "weekly" | "week" | "every week" | "haftalik" | "her hafta" => RecurrenceType::Weekly,
            "monthly" | "month" | "every month" | "aylik" | "her ay" => RecurrenceType::Monthly,
            "yearly" | "year" | "annual" | "annually" | "every year" | "yillik" | "senelik"
            | "her yil" => RecurrenceType::Yearly,
            _ => RecurrenceType::Monthly,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RecurrenceType::Daily => "Daily",
            RecurrenceType::Weekly => "Weekly",
            RecurrenceType::Monthly => "Monthly",
            RecurrenceType::Yearly => "Yearly",
        }
    }
}

impl fmt::Display for RecurrenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn fold_label(label: &str) -> String {
    let mut folded = String::with_capacity(label.len());
    let mut last_space = false;
    for ch in label.trim().chars() {
        let mapped = match ch {
            'ı' | 'İ' | 'I' => 'i',
            'ğ' | 'Ğ' => 'g',
            'ü' | 'Ü' => 'u',
            'ş' | 'Ş' => 's',
            'ö' | 'Ö' => 'o',
            'ç' | 'Ç' => 'c',
            '-' | '_' => ' ',
            other => other,
        };
        if mapped.is_whitespace() {
            if !last_space {
                folded.push(' ');
            }
            last_space = true;
            continue;
        }
        last_space = false;
        folded.extend(mapped.to_lowercase());
    }
    folded
}

/// Converts a chrono weekday into the domain code (1 = Monday .. 7 = Sunday).
pub fn weekday_code(day: Weekday) -> u8 {
    day.number_from_monday() as u8
}

pub fn weekday_from_code(code: u8) -> Option<Weekday> {
    match code {
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        7 => Some(Weekday::Sun),
        _ => None,
    }
}

/// Frequency descriptor attached to a scheduled payment, plus the progress counters the
/// reconciler maintains.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub id: Uuid,
    pub scheduled_payment_id: Uuid,
    pub recurrence_type: RecurrenceType,
    #[serde(default = "RecurrenceRule::default_interval")]
    pub interval: u32,
    /// Weekday codes, 1 = Monday .. 7 = Sunday. Weekly rules only.
    #[serde(
        default,
        deserialize_with = "deserialize_weekdays",
        skip_serializing_if = "Option::is_none"
    )]
    pub days_of_week: Option<Vec<u8>>,
    /// Monthly rules only. Falls back to the anchor's day when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_occurrences: Option<u32>,
    #[serde(default)]
    pub current_occurrences: u32,
    #[serde(default)]
    pub last_generated: Option<NaiveDate>,
    #[serde(default = "RecurrenceRule::default_active")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurrenceRule {
    pub fn new(scheduled_payment_id: Uuid, recurrence_type: RecurrenceType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            scheduled_payment_id,
            recurrence_type,
            interval: Self::default_interval(),
            days_of_week: None,
            day_of_month: None,
            end_date: None,
            max_occurrences: None,
            current_occurrences: 0,
            last_generated: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// The rule used for a recurring payment that has no stored rules.
    pub fn implicit_for(payment: &ScheduledPayment) -> Self {
        let mut rule = Self::new(
            payment.id,
            RecurrenceType::from_frequency_label(&payment.frequency),
        );
        rule.created_at = payment.created_at;
        rule.updated_at = payment.created_at;
        rule
    }

    pub fn with_interval(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the weekday codes. Duplicates are dropped and an empty list means "no explicit
    /// weekdays".
    pub fn with_days_of_week(mut self, days: impl IntoIterator<Item = u8>) -> Self {
        self.days_of_week = normalize_weekdays(days.into_iter().collect());
        self
    }

    pub fn with_day_of_month(mut self, day: u32) -> Self {
        self.day_of_month = Some(day);
        self
    }

    pub fn with_end_date(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn with_max_occurrences(mut self, max: u32) -> Self {
        self.max_occurrences = Some(max);
        self
    }

    /// Finishes a builder chain, rejecting contradictory settings.
    pub fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(ScheduleError::Validation(
                "recurrence interval must be at least 1".into(),
            ));
        }
        if let Some(days) = &self.days_of_week {
            if let Some(bad) = days.iter().find(|code| weekday_from_code(**code).is_none()) {
                return Err(ScheduleError::Validation(format!(
                    "weekday code {bad} is outside 1..=7"
                )));
            }
        }
        if let Some(day) = self.day_of_month {
            if !(1..=31).contains(&day) {
                return Err(ScheduleError::Validation(format!(
                    "day of month {day} is outside 1..=31"
                )));
            }
        }
        if let Some(max) = self.max_occurrences {
            if max <= self.current_occurrences {
                return Err(ScheduleError::Validation(format!(
                    "max occurrences ({max}) must exceed occurrences already generated ({})",
                    self.current_occurrences
                )));
            }
        }
        if let (Some(end), Some(last)) = (self.end_date, self.last_generated) {
            if last > end {
                return Err(ScheduleError::Validation(format!(
                    "last generated date {last} is after end date {end}"
                )));
            }
        }
        Ok(())
    }

    /// Whether the reconciler may still materialise occurrences for this rule on `today`.
    pub fn is_valid_on(&self, today: NaiveDate) -> bool {
        if !self.is_active {
            return false;
        }
        if self
            .max_occurrences
            .is_some_and(|max| self.current_occurrences >= max)
        {
            return false;
        }
        !self.end_date.is_some_and(|end| today > end)
    }

    /// Explicit weekday set, ignoring an empty list.
    pub fn weekdays(&self) -> Option<&[u8]> {
        self.days_of_week
            .as_deref()
            .filter(|days| !days.is_empty())
    }

    /// Records one materialised occurrence.
    pub fn advance(&mut self, occurrence: NaiveDate, now: DateTime<Utc>) {
        self.current_occurrences = self.current_occurrences.saturating_add(1);
        self.last_generated = Some(occurrence);
        self.updated_at = now;
    }

    pub fn default_interval() -> u32 {
        1
    }

    pub fn default_active() -> bool {
        true
    }
}

fn normalize_weekdays(mut days: Vec<u8>) -> Option<Vec<u8>> {
    days.sort_unstable();
    days.dedup();
    if days.is_empty() {
        None
    } else {
        Some(days)
    }
}

fn deserialize_weekdays<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<u8>>::deserialize(deserializer)?;
    Ok(raw.and_then(normalize_weekdays))
}
