use chrono::{DateTime, NaiveDate, Utc};
use recur_core::{JobPayload, RecurrenceRule, TaskId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};

/// A registered recurring task as the scheduler loop sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleTask {
    pub id: TaskId,
    pub rule: RecurrenceRule,
    pub payload: JobPayload,
    /// Disabled tasks stay registered but have no heap entry.
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    /// `None` once the rule is exhausted.
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where the loop is in its wake cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    /// Heap empty, no timer armed.
    Idle,
    /// A timer is armed for the current heap minimum.
    Armed,
    /// A wake is being processed; registrations are deferred.
    Firing,
}

/// Lifecycle state of one firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Succeeded | ExecutionStatus::Failed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "succeeded" => Ok(ExecutionStatus::Succeeded),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Outcome of one logical firing, including every retry of it.
///
/// One record per firing: retries bump `retry_count` on the same record. Once
/// the status is terminal the record rejects further transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// UUID v4 string, primary key.
    pub id: String,
    pub task_id: TaskId,
    pub fired_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub duration_ms: Option<u64>,
    /// Handler output of the successful attempt.
    pub result: Option<serde_json::Value>,
    /// Error of the most recent failed attempt.
    pub error: Option<String>,
    /// Number of failed attempts so far.
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn new(task_id: TaskId, fired_at: DateTime<Utc>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id,
            fired_at,
            status: ExecutionStatus::Pending,
            duration_ms: None,
            result: None,
            error: None,
            retry_count: 0,
            created_at,
        }
    }

    /// `Pending → Running`.
    pub fn start(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.status = ExecutionStatus::Running;
        Ok(())
    }

    /// `Running → Succeeded`.
    pub fn succeed(&mut self, result: Option<serde_json::Value>, duration_ms: u64) -> Result<()> {
        self.ensure_open()?;
        self.status = ExecutionStatus::Succeeded;
        self.result = result;
        self.duration_ms = Some(duration_ms);
        Ok(())
    }

    /// Record a failed attempt. Returns `true` while another attempt is
    /// allowed; once `retry_count` reaches `max_retry_count` the record is
    /// finalized `Failed` and `false` is returned.
    pub fn fail_attempt(
        &mut self,
        error: impl Into<String>,
        max_retry_count: u32,
        duration_ms: u64,
    ) -> Result<bool> {
        self.ensure_open()?;
        self.retry_count += 1;
        self.error = Some(error.into());
        self.duration_ms = Some(duration_ms);
        if self.retry_count >= max_retry_count {
            self.status = ExecutionStatus::Failed;
            return Ok(false);
        }
        self.status = ExecutionStatus::Running;
        Ok(true)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(SchedulerError::RecordFinalized {
                id: self.id.clone(),
                status: self.status.to_string(),
            });
        }
        Ok(())
    }
}

/// Notifications produced by the engine for external collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// Emitted once per due firing, after the handler returned or failed for good.
    Fired {
        id: TaskId,
        payload: JobPayload,
        fired_at: DateTime<Utc>,
        status: ExecutionStatus,
    },
    /// A firing failed `max_retry_count` times and was finalized `Failed`.
    RetriesExhausted {
        id: TaskId,
        execution_id: String,
        retry_count: u32,
        error: Option<String>,
    },
    /// The template occurrence behind an exhausted firing should become `Expired`.
    OccurrenceExpired {
        id: TaskId,
        template_id: String,
        instance_date: NaiveDate,
    },
}
