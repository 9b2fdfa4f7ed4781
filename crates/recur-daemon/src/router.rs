//! Consumes scheduler events: logs firings and expires occurrences whose
//! due job failed for good.

use std::sync::Arc;

use recur_instances::{OccurrenceRepository, OccurrenceStatus};
use recur_scheduler::{ExecutionStatus, SchedulerEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub async fn run_event_router(
    mut events: mpsc::Receiver<SchedulerEvent>,
    occurrences: Arc<dyn OccurrenceRepository>,
) {
    while let Some(event) = events.recv().await {
        handle_event(event, occurrences.as_ref());
    }
    debug!("event channel closed; router exiting");
}

fn handle_event(event: SchedulerEvent, occurrences: &dyn OccurrenceRepository) {
    match event {
        SchedulerEvent::Fired {
            id, fired_at, status, ..
        } => match status {
            ExecutionStatus::Succeeded => info!(task_id = %id, %fired_at, "fired"),
            other => warn!(task_id = %id, %fired_at, status = %other, "fired without success"),
        },
        SchedulerEvent::RetriesExhausted {
            id,
            execution_id,
            retry_count,
            error,
        } => {
            warn!(task_id = %id, %execution_id, retry_count, error = ?error, "retries exhausted");
        }
        SchedulerEvent::OccurrenceExpired {
            id,
            template_id,
            instance_date,
        } => {
            if let Err(e) = expire_occurrence(occurrences, &template_id, instance_date) {
                warn!(
                    task_id = %id,
                    %template_id,
                    %instance_date,
                    "could not expire occurrence: {e}"
                );
            }
        }
    }
}

fn expire_occurrence(
    occurrences: &dyn OccurrenceRepository,
    template_id: &str,
    date: chrono::NaiveDate,
) -> recur_instances::Result<()> {
    let Some(mut occ) = occurrences.find_occurrence(template_id, date)? else {
        debug!(%template_id, %date, "no occurrence to expire");
        return Ok(());
    };
    if occ.status != OccurrenceStatus::Pending {
        debug!(occurrence_id = %occ.id, status = %occ.status, "occurrence already resolved");
        return Ok(());
    }
    occ.expire()?;
    occurrences.update_occurrence(&occ)?;
    info!(occurrence_id = %occ.id, %template_id, %date, "occurrence expired");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use recur_core::TaskId;
    use recur_instances::{InMemoryTemplateStore, Occurrence, TimeWindow};

    #[tokio::test]
    async fn expired_event_marks_pending_occurrence() {
        let start = Utc.with_ymd_and_hms(2026, 8, 5, 7, 0, 0).unwrap();
        let date = start.date_naive();
        let store = Arc::new(InMemoryTemplateStore::new());
        store
            .insert_occurrences(&[
                Occurrence::new("tpl-a", date, TimeWindow::starting_at(start, 30)),
                Occurrence::new("tpl-b", date, TimeWindow::starting_at(start, 30)),
            ])
            .unwrap();
        let mut done = store.find_occurrence("tpl-b", date).unwrap().unwrap();
        done.complete(start, None).unwrap();
        store.update_occurrence(&done).unwrap();

        let (tx, rx) = mpsc::channel(4);
        for template in ["tpl-a", "tpl-b", "tpl-missing"] {
            tx.send(SchedulerEvent::OccurrenceExpired {
                id: TaskId::from(format!("template:{template}")),
                template_id: template.to_string(),
                instance_date: date,
            })
            .await
            .unwrap();
        }
        drop(tx);
        run_event_router(rx, store.clone()).await;

        let status = |t: &str| store.find_occurrence(t, date).unwrap().unwrap().status;
        assert_eq!(status("tpl-a"), OccurrenceStatus::Expired);
        assert_eq!(status("tpl-b"), OccurrenceStatus::Completed);
    }
}
