//! Pre-parsed recurrence rules.
//!
//! Rules are evaluated in UTC. Every variant can answer two questions: which
//! calendar dates it covers (used by instance generation) and which instant it
//! fires at next (used by the scheduler loop). Both answers come from the same
//! date enumeration so the two consumers never disagree.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Wall-clock time of day (UTC) at which a dated rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay { hour: 0, minute: 0 };

    pub fn new(hour: u8, minute: u8) -> Self {
        Self { hour, minute }
    }

    /// The UTC instant of this time on `date`. `None` for out-of-range fields.
    pub fn on(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        date.and_hms_opt(self.hour as u32, self.minute as u32, 0)
            .map(|naive| naive.and_utc())
    }

    fn validate(&self) -> Result<()> {
        if self.hour > 23 || self.minute > 59 {
            return Err(CoreError::Validation(format!(
                "time of day out of range: {:02}:{:02}",
                self.hour, self.minute
            )));
        }
        Ok(())
    }
}

/// Defines on which dates (and at what time) a template repeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecurrenceRule {
    /// Fire exactly once at the given UTC instant.
    Once { at: DateTime<Utc> },

    /// Every `every_days` days, counted from `anchor` (which itself matches).
    Daily {
        every_days: u32,
        anchor: NaiveDate,
        at: TimeOfDay,
    },

    /// On each listed weekday (0 = Monday … 6 = Sunday).
    Weekly { days: Vec<u8>, at: TimeOfDay },

    /// On an explicit list of dates. Order and duplicates do not matter.
    Custom { dates: Vec<NaiveDate>, at: TimeOfDay },
}

impl RecurrenceRule {
    /// Reject rules that could never be evaluated.
    pub fn validate(&self) -> Result<()> {
        match self {
            RecurrenceRule::Once { .. } => Ok(()),
            RecurrenceRule::Daily { every_days, at, .. } => {
                if *every_days == 0 {
                    return Err(CoreError::Validation(
                        "daily rule interval must be at least 1 day".to_string(),
                    ));
                }
                at.validate()
            }
            RecurrenceRule::Weekly { days, at } => {
                if days.is_empty() {
                    return Err(CoreError::Validation(
                        "weekly rule needs at least one day".to_string(),
                    ));
                }
                if let Some(bad) = days.iter().find(|d| **d > 6) {
                    return Err(CoreError::Validation(format!(
                        "weekday {bad} out of range (0 = Monday … 6 = Sunday)"
                    )));
                }
                at.validate()
            }
            RecurrenceRule::Custom { dates, at } => {
                if dates.is_empty() {
                    return Err(CoreError::Validation(
                        "custom rule needs at least one date".to_string(),
                    ));
                }
                at.validate()
            }
        }
    }

    /// Whether `date` is one of the rule's calendar dates.
    pub fn matches(&self, date: NaiveDate) -> bool {
        match self {
            RecurrenceRule::Once { at } => at.date_naive() == date,
            RecurrenceRule::Daily {
                every_days, anchor, ..
            } => {
                if date < *anchor || *every_days == 0 {
                    return false;
                }
                (date - *anchor).num_days() % (*every_days as i64) == 0
            }
            RecurrenceRule::Weekly { days, .. } => {
                let dow = date.weekday().num_days_from_monday() as u8;
                days.contains(&dow)
            }
            RecurrenceRule::Custom { dates, .. } => dates.contains(&date),
        }
    }

    /// First matching date on or after `from`, or `None` when the rule is exhausted.
    pub fn next_date_from(&self, from: NaiveDate) -> Option<NaiveDate> {
        match self {
            RecurrenceRule::Once { at } => {
                let date = at.date_naive();
                (date >= from).then_some(date)
            }
            RecurrenceRule::Daily {
                every_days, anchor, ..
            } => {
                if *every_days == 0 {
                    return None;
                }
                if from <= *anchor {
                    return Some(*anchor);
                }
                let step = *every_days as i64;
                let rem = (from - *anchor).num_days() % step;
                if rem == 0 {
                    Some(from)
                } else {
                    from.checked_add_signed(chrono::Duration::days(step - rem))
                }
            }
            RecurrenceRule::Weekly { .. } => {
                // A non-empty day set always matches within one week.
                (0..7)
                    .filter_map(|offset| from.checked_add_signed(chrono::Duration::days(offset)))
                    .find(|d| self.matches(*d))
            }
            RecurrenceRule::Custom { dates, .. } => {
                dates.iter().filter(|d| **d >= from).min().copied()
            }
        }
    }

    /// Every matching date in `[from, to]`, ascending, each exactly once.
    pub fn dates_between(&self, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        let mut out = Vec::new();
        let mut cursor = self.next_date_from(from);
        while let Some(date) = cursor {
            if date > to {
                break;
            }
            out.push(date);
            cursor = date.succ_opt().and_then(|next| self.next_date_from(next));
        }
        out
    }

    /// Time of day the rule fires at on each of its dates.
    pub fn time_of_day(&self) -> TimeOfDay {
        match self {
            RecurrenceRule::Once { at } => TimeOfDay::new(at.hour() as u8, at.minute() as u8),
            RecurrenceRule::Daily { at, .. }
            | RecurrenceRule::Weekly { at, .. }
            | RecurrenceRule::Custom { at, .. } => *at,
        }
    }

    /// The first firing instant strictly after `after`.
    ///
    /// Returns `None` when the rule has no later date (a past `Once`, or a
    /// `Custom` list whose dates are all behind us).
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if let RecurrenceRule::Once { at } = self {
            return (*at > after).then_some(*at);
        }

        let at = self.time_of_day();
        let mut from = after.date_naive();
        loop {
            let date = self.next_date_from(from)?;
            let candidate = at.on(date)?;
            if candidate > after {
                return Some(candidate);
            }
            // Today's slot already passed; try the next date.
            from = date.succ_opt()?;
        }
    }
}
