//! Read-only expansion of scheduled payments into due dates.
//!
//! Nothing in this module touches rule counters; it is safe to call for speculative previews
//! from any number of threads.

use chrono::{Duration, NaiveDate};
use tracing::warn;

use super::payment::{PlannedOccurrence, ScheduledPayment};
use super::rule::RecurrenceRule;
use super::step::{fixed_step_days, listed_weekday_jump, next_date};

/// Iteration ceiling for rules that never reach the requested window or never terminate.
pub const SAFETY_GUARD: u32 = 1000;

/// Dates contributed by a single rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleExpansion {
    pub dates: Vec<NaiveDate>,
    /// Set when [`SAFETY_GUARD`] cut the expansion short.
    pub truncated: bool,
}

/// Lists the occurrences of `payment` inside the inclusive window `[start, end]`.
///
/// Each active rule contributes independently and the results are concatenated in rule
/// order without deduplication. A recurring payment with no rules gets an implicit rule
/// derived from its frequency label.
pub fn generate_occurrences<'a>(
    payment: &'a ScheduledPayment,
    rules: &[RecurrenceRule],
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<PlannedOccurrence<'a>> {
    if start > end {
        return Vec::new();
    }

    if !payment.is_recurring {
        if payment.is_paid || payment.due_date < start || payment.due_date > end {
            return Vec::new();
        }
        return vec![PlannedOccurrence {
            payment,
            date: payment.due_date,
        }];
    }

    let implicit;
    let rules = if rules.is_empty() {
        implicit = [RecurrenceRule::implicit_for(payment)];
        &implicit[..]
    } else {
        rules
    };

    let mut occurrences = Vec::new();
    for rule in rules.iter().filter(|rule| rule.is_active) {
        let expansion = expand_rule(rule, payment.due_date, start, end);
        if expansion.truncated {
            warn!(
                payment_id = %payment.id,
                rule_id = %rule.id,
                guard = SAFETY_GUARD,
                "occurrence expansion hit the safety guard"
            );
        }
        occurrences.extend(
            expansion
                .dates
                .into_iter()
                .map(|date| PlannedOccurrence { payment, date }),
        );
    }
    occurrences
}

/// Expands one rule anchored at `anchor` into the dates that fall in `[start, end]`.
///
/// `max_occurrences` counts the whole series from the anchor, so a capped rule never yields
/// more dates than its cap regardless of the window.
pub fn expand_rule(
    rule: &RecurrenceRule,
    anchor: NaiveDate,
    start: NaiveDate,
    end: NaiveDate,
) -> RuleExpansion {
    let mut expansion = RuleExpansion::default();
    let upper = rule.end_date.map_or(end, |rule_end| rule_end.min(end));
    if upper < start {
        return expansion;
    }
    let cap = rule.max_occurrences.map(u64::from);

    let Some((mut candidate, mut index)) = fast_forward(rule, anchor, start) else {
        expansion.truncated = true;
        return expansion;
    };

    loop {
        if cap.is_some_and(|cap| index >= cap) || candidate > upper {
            break;
        }
        if expansion.dates.len() >= SAFETY_GUARD as usize {
            expansion.truncated = true;
            break;
        }
        expansion.dates.push(candidate);
        match next_date(candidate, anchor, rule) {
            Some(next) if next > candidate => candidate = next,
            Some(_) => {
                expansion.truncated = true;
                break;
            }
            None => break,
        }
        index += 1;
    }
    expansion
}

/// Finds the first occurrence on or after `start` together with its position in the series.
///
/// Daily, plain weekly and weekday-list rules jump close to `start` arithmetically; the rest
/// walk from the anchor. Returns `None` when the walk exceeded [`SAFETY_GUARD`] steps or the
/// series stopped advancing.
fn fast_forward(rule: &RecurrenceRule, anchor: NaiveDate, start: NaiveDate) -> Option<(NaiveDate, u64)> {
    if anchor >= start {
        return Some((anchor, 0));
    }

    if let Some(step) = fixed_step_days(rule) {
        let gap = (start - anchor).num_days();
        let steps = (gap + step - 1).div_euclid(step);
        let candidate = anchor.checked_add_signed(Duration::days(steps * step))?;
        return Some((candidate, steps as u64));
    }

    let (mut candidate, mut index) =
        listed_weekday_jump(rule, anchor, start).unwrap_or((anchor, 0));
    let mut steps = 0u32;
    while candidate < start {
        if steps >= SAFETY_GUARD {
            return None;
        }
        let next = next_date(candidate, anchor, rule)?;
        if next <= candidate {
            return None;
        }
        candidate = next;
        index += 1;
        steps += 1;
    }
    Some((candidate, index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::rule::RecurrenceType;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn fast_forward_jumps_fixed_steps_arithmetically() {
        let rule = RecurrenceRule::new(uuid::Uuid::new_v4(), RecurrenceType::Daily).with_interval(3);
        let anchor = date(2020, 1, 1);
        let (first, index) = fast_forward(&rule, anchor, date(2024, 6, 1)).unwrap();
        assert!(first >= date(2024, 6, 1));
        assert!(first < date(2024, 6, 4));
        assert_eq!((first - anchor).num_days() % 3, 0);
        assert_eq!(index as i64, (first - anchor).num_days() / 3);
    }

    #[test]
    fn fast_forward_gives_up_after_the_guard() {
        let rule = RecurrenceRule::new(uuid::Uuid::new_v4(), RecurrenceType::Monthly);
        // 130 years of months: far more steps than the guard allows.
        assert!(fast_forward(&rule, date(1900, 1, 1), date(2030, 1, 1)).is_none());
    }

    fn walk_from_anchor(rule: &RecurrenceRule, anchor: NaiveDate, start: NaiveDate) -> (NaiveDate, u64) {
        let (mut candidate, mut index) = (anchor, 0);
        while candidate < start {
            candidate = next_date(candidate, anchor, rule).unwrap();
            index += 1;
        }
        (candidate, index)
    }

    #[test]
    fn weekday_lists_jump_to_the_same_position_as_walking() {
        // 2024-01-04 is a Thursday.
        let anchor = date(2024, 1, 4);
        let cases: [(u32, &[u8]); 4] = [(1, &[1, 2, 3, 4, 5]), (3, &[2, 5]), (2, &[4]), (4, &[1, 7])];
        for (interval, days) in cases {
            let rule = RecurrenceRule::new(uuid::Uuid::new_v4(), RecurrenceType::Weekly)
                .with_interval(interval)
                .with_days_of_week(days.iter().copied());
            for start in [
                date(2024, 1, 5),
                date(2024, 1, 8),
                date(2024, 1, 21),
                date(2024, 6, 12),
                date(2024, 12, 29),
            ] {
                assert_eq!(
                    fast_forward(&rule, anchor, start),
                    Some(walk_from_anchor(&rule, anchor, start)),
                    "every {interval} weeks on {days:?} from {start}"
                );
            }
        }
    }
}
