//! Job payloads carried by scheduled tasks.
//!
//! The set of job kinds is closed: every variant has a concrete payload type,
//! and the scheduler's handler registry dispatches on [`JobKind`] so each
//! handler only ever sees the payload shape it was written for.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Tag identifying which handler runs a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Reminder,
    TaskDue,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobKind::Reminder => "reminder",
            JobKind::TaskDue => "task_due",
        };
        write!(f, "{s}")
    }
}

/// Where a fired reminder should be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    Push,
    Email,
    InApp,
}

/// A user-facing reminder: delivered through a notification channel when fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderAction {
    pub channel: DeliveryChannel,
    /// Recipient of the notification.
    pub user_id: String,
    /// Text to deliver.
    pub message: String,
    /// Session key for in-app delivery, so the notification lands in the right session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
}

/// The due-signal of a recurring task template's occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDueAction {
    /// Template whose occurrence is due; used to mark the occurrence expired
    /// when the firing ultimately fails.
    pub template_id: String,
    pub title: String,
}

/// Closed set of job payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum JobPayload {
    Reminder(ReminderAction),
    TaskDue(TaskDueAction),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Reminder(_) => JobKind::Reminder,
            JobPayload::TaskDue(_) => JobKind::TaskDue,
        }
    }

    /// Template id when the job materializes a template occurrence.
    pub fn template_id(&self) -> Option<&str> {
        match self {
            JobPayload::TaskDue(action) => Some(&action.template_id),
            JobPayload::Reminder(_) => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            JobPayload::Reminder(r) => {
                if r.message.trim().is_empty() {
                    return Err(CoreError::Validation(
                        "reminder message must not be empty".to_string(),
                    ));
                }
                if r.user_id.is_empty() {
                    return Err(CoreError::Validation(
                        "reminder needs a recipient user_id".to_string(),
                    ));
                }
                Ok(())
            }
            JobPayload::TaskDue(t) => {
                if t.template_id.is_empty() {
                    return Err(CoreError::Validation(
                        "task_due payload needs a template_id".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reminder(message: &str) -> JobPayload {
        JobPayload::Reminder(ReminderAction {
            channel: DeliveryChannel::Push,
            user_id: "u-1".to_string(),
            message: message.to_string(),
            session_key: None,
        })
    }

    #[test]
    fn payload_wire_format_is_tagged() {
        let json = serde_json::to_string(&reminder("stand up")).unwrap();
        assert!(json.contains(r#""type":"reminder""#));
        assert!(json.contains(r#""channel":"push""#));
        // optional field omitted when unset
        assert!(!json.contains("session_key"));
    }

    #[test]
    fn blank_reminder_is_rejected() {
        assert!(reminder("   ").validate().is_err());
        assert!(reminder("drink water").validate().is_ok());
    }

    #[test]
    fn template_id_only_for_task_due() {
        let due = JobPayload::TaskDue(TaskDueAction {
            template_id: "tpl-9".to_string(),
            title: "Weekly review".to_string(),
        });
        assert_eq!(due.template_id(), Some("tpl-9"));
        assert_eq!(due.kind(), JobKind::TaskDue);
        assert_eq!(reminder("x").template_id(), None);
    }
}
