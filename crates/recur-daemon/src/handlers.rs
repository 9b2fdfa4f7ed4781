//! Job handlers the daemon registers with the scheduler.

use std::sync::Arc;

use async_trait::async_trait;
use recur_core::types::from_timestamp;
use recur_core::{ReminderAction, TaskDueAction, TaskId};
use recur_instances::{OccurrenceRepository, OccurrenceStatus, TemplateRepository};
use recur_scheduler::{HandlerRegistry, JobHandler, JobOutput, SchedulerError, TimeSource};
use tracing::{debug, info};

/// Delivers reminders by writing them to the log. Channel adapters hook in here.
pub struct LogReminders;

#[async_trait]
impl JobHandler<ReminderAction> for LogReminders {
    async fn handle(
        &self,
        task_id: &TaskId,
        payload: &ReminderAction,
    ) -> recur_scheduler::Result<JobOutput> {
        info!(
            task_id = %task_id,
            user_id = %payload.user_id,
            channel = ?payload.channel,
            session_key = ?payload.session_key,
            "reminder: {}",
            payload.message
        );
        Ok(Some(serde_json::json!({
            "channel": payload.channel,
            "user_id": payload.user_id,
        })))
    }
}

/// Signals that today's occurrence of a template is due.
///
/// Days outside the template's start and end dates are skipped. Inside them,
/// fails when the occurrence was never materialized, so the scheduler retries
/// and eventually reports it expired.
pub struct OccurrenceDue {
    pub templates: Arc<dyn TemplateRepository>,
    pub occurrences: Arc<dyn OccurrenceRepository>,
    pub time: Arc<dyn TimeSource>,
}

#[async_trait]
impl JobHandler<TaskDueAction> for OccurrenceDue {
    async fn handle(
        &self,
        task_id: &TaskId,
        payload: &TaskDueAction,
    ) -> recur_scheduler::Result<JobOutput> {
        let today = from_timestamp(self.time.now()).date_naive();
        let template = self
            .templates
            .get_template(&payload.template_id)
            .map_err(|e| SchedulerError::Execution(e.to_string()))?;
        if let Some(template) = template.filter(|t| !t.covers(today)) {
            debug!(
                task_id = %task_id,
                %today,
                start = %template.start_date,
                "outside template dates"
            );
            return Ok(Some(serde_json::json!({ "skipped": "outside template dates" })));
        }

        let occurrence = self
            .occurrences
            .find_occurrence(&payload.template_id, today)
            .map_err(|e| SchedulerError::Execution(e.to_string()))?
            .ok_or_else(|| {
                SchedulerError::Execution(format!(
                    "no occurrence of template {} on {today}",
                    payload.template_id
                ))
            })?;

        if occurrence.status == OccurrenceStatus::Pending {
            info!(task_id = %task_id, occurrence_id = %occurrence.id, "due: {}", payload.title);
        }
        Ok(Some(serde_json::json!({
            "occurrence_id": occurrence.id,
            "status": occurrence.status,
        })))
    }
}

pub fn build_registry(
    templates: Arc<dyn TemplateRepository>,
    occurrences: Arc<dyn OccurrenceRepository>,
    time: Arc<dyn TimeSource>,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register::<ReminderAction, _>(LogReminders)
        .register::<TaskDueAction, _>(OccurrenceDue {
            templates,
            occurrences,
            time,
        });
    registry
}
