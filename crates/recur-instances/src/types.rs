use chrono::{DateTime, Duration, NaiveDate, Utc};
use recur_core::RecurrenceRule;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{InstanceError, Result};

/// A recurring task definition from which occurrences are materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: String,
    pub title: String,
    pub rule: RecurrenceRule,
    /// Length of each occurrence's time window.
    pub duration_minutes: u32,
    /// First date occurrences may fall on.
    pub start_date: NaiveDate,
    /// Last date occurrences may fall on, if bounded.
    pub end_date: Option<NaiveDate>,
    pub active: bool,
    /// Horizon of the last generation run; nothing on or before it is regenerated.
    pub last_generated_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl TaskTemplate {
    pub fn new(title: impl Into<String>, rule: RecurrenceRule, start_date: NaiveDate) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            title: title.into(),
            rule,
            duration_minutes: 30,
            start_date,
            end_date: None,
            active: true,
            last_generated_date: None,
            created_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(InstanceError::InvalidTemplate("title must not be empty".to_string()));
        }
        if let Some(end) = self.end_date {
            if end < self.start_date {
                return Err(InstanceError::InvalidTemplate(format!(
                    "end date {end} precedes start date {}",
                    self.start_date
                )));
            }
        }
        self.rule.validate()?;
        Ok(())
    }

    /// Whether `date` lies within `[start_date, end_date]`.
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.start_date && self.end_date.map_or(true, |end| date <= end)
    }

    /// Whether the last date of a bounded template lies before `today`.
    pub fn has_ended(&self, today: NaiveDate) -> bool {
        self.end_date.is_some_and(|end| end < today)
    }
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn starting_at(start: DateTime<Utc>, minutes: u32) -> Self {
        Self {
            start,
            end: start + Duration::minutes(minutes as i64),
        }
    }

    pub fn is_instant(&self) -> bool {
        self.end <= self.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceStatus {
    Pending,
    Completed,
    Skipped,
    Expired,
}

impl std::fmt::Display for OccurrenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OccurrenceStatus::Pending => "pending",
            OccurrenceStatus::Completed => "completed",
            OccurrenceStatus::Skipped => "skipped",
            OccurrenceStatus::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for OccurrenceStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OccurrenceStatus::Pending),
            "completed" => Ok(OccurrenceStatus::Completed),
            "skipped" => Ok(OccurrenceStatus::Skipped),
            "expired" => Ok(OccurrenceStatus::Expired),
            other => Err(format!("unknown occurrence status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionInfo {
    pub completed_at: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipInfo {
    pub skipped_at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// One concrete, dated instance of a template.
///
/// Identified by `(template_id, instance_date)`. Leaves `Pending` exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: String,
    pub template_id: String,
    pub instance_date: NaiveDate,
    pub time_window: TimeWindow,
    pub status: OccurrenceStatus,
    /// Set by `start`; the occurrence stays `Pending` until it is resolved.
    pub started_at: Option<DateTime<Utc>>,
    pub completion: Option<CompletionInfo>,
    pub skip: Option<SkipInfo>,
}

impl Occurrence {
    pub fn new(
        template_id: impl Into<String>,
        instance_date: NaiveDate,
        time_window: TimeWindow,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            template_id: template_id.into(),
            instance_date,
            time_window,
            status: OccurrenceStatus::Pending,
            started_at: None,
            completion: None,
            skip: None,
        }
    }

    /// Mark work on the occurrence as begun. Starting twice is rejected.
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.ensure_pending("started")?;
        if self.started_at.is_some() {
            return Err(InstanceError::InvalidTransition {
                from: "started".to_string(),
                to: "started".to_string(),
            });
        }
        self.started_at = Some(at);
        Ok(())
    }

    pub fn complete(&mut self, at: DateTime<Utc>, note: Option<String>) -> Result<()> {
        self.ensure_pending("completed")?;
        self.status = OccurrenceStatus::Completed;
        self.completion = Some(CompletionInfo { completed_at: at, note });
        Ok(())
    }

    pub fn skip(&mut self, at: DateTime<Utc>, reason: Option<String>) -> Result<()> {
        self.ensure_pending("skipped")?;
        self.status = OccurrenceStatus::Skipped;
        self.skip = Some(SkipInfo { skipped_at: at, reason });
        Ok(())
    }

    pub fn expire(&mut self) -> Result<()> {
        self.ensure_pending("expired")?;
        self.status = OccurrenceStatus::Expired;
        Ok(())
    }

    fn ensure_pending(&self, to: &str) -> Result<()> {
        if self.status != OccurrenceStatus::Pending {
            return Err(InstanceError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }
}
