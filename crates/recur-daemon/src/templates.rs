//! Keeps the scheduler's template due-signals and the occurrence horizon in
//! step with the template store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use recur_core::types::from_timestamp;
use recur_core::{JobPayload, TaskDueAction, TaskId};
use recur_instances::{RefillJob, TaskTemplate, TemplateRepository};
use recur_scheduler::{Scheduler, TimeSource};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const TEMPLATE_PREFIX: &str = "template:";

pub fn template_task_id(template_id: &str) -> TaskId {
    TaskId::from(format!("{TEMPLATE_PREFIX}{template_id}"))
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub cancelled: usize,
}

/// Register a due-signal schedule per active template, refresh changed ones
/// and cancel those whose template is gone, inactive or past its end date.
pub fn sync_template_schedules(
    scheduler: &Scheduler,
    templates: &dyn TemplateRepository,
    today: NaiveDate,
) -> recur_instances::Result<SyncSummary> {
    let wanted: HashMap<TaskId, TaskTemplate> = templates
        .find_active_templates()?
        .into_iter()
        .filter(|t| !t.has_ended(today))
        .map(|t| (template_task_id(&t.id), t))
        .collect();
    let mut summary = SyncSummary::default();

    for id in scheduler.list_schedules() {
        if id.as_str().starts_with(TEMPLATE_PREFIX) && !wanted.contains_key(&id) {
            match scheduler.cancel_schedule(&id) {
                Ok(_) => summary.cancelled += 1,
                Err(e) => warn!(task_id = %id, "cancel failed: {e}"),
            }
        }
    }

    for (id, template) in wanted {
        let payload = JobPayload::TaskDue(TaskDueAction {
            template_id: template.id.clone(),
            title: template.title.clone(),
        });
        let result = match scheduler.get_schedule(&id) {
            Some(task) if task.rule == template.rule && task.payload == payload => continue,
            Some(_) => scheduler
                .update_schedule(id.clone(), template.rule, payload)
                .map(|_| summary.updated += 1),
            None => scheduler
                .create_schedule(id.clone(), template.rule, payload)
                .map(|_| summary.created += 1),
        };
        if let Err(e) = result {
            warn!(task_id = %id, "template schedule rejected: {e}");
        }
    }

    debug!(?summary, "template schedules synced");
    Ok(summary)
}

/// Periodically refill occurrences and resync schedules until shutdown.
pub async fn run_refill_loop(
    job: RefillJob,
    scheduler: Scheduler,
    templates: Arc<dyn TemplateRepository>,
    time: Arc<dyn TimeSource>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = every.as_secs(), "refill loop started");
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = from_timestamp(time.now());
                if let Err(e) = job.run_once(now) {
                    error!("refill pass failed: {e}");
                }
                let today = now.date_naive();
                let synced = sync_template_schedules(&scheduler, templates.as_ref(), today);
                if let Err(e) = synced {
                    error!("template sync failed: {e}");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("refill loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use recur_core::config::SchedulerConfig;
    use recur_core::types::to_timestamp;
    use recur_core::{RecurrenceRule, TimeOfDay};
    use recur_instances::InMemoryTemplateStore;
    use recur_scheduler::{HandlerRegistry, InMemoryExecutionRecords, ManualTimeSource};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()
    }

    fn scheduler() -> Scheduler {
        let clock = Arc::new(ManualTimeSource::new(to_timestamp(
            Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap(),
        )));
        Scheduler::new(
            clock,
            HandlerRegistry::new(),
            Arc::new(InMemoryExecutionRecords::new()),
            SchedulerConfig::default(),
            None,
        )
        .unwrap()
    }

    fn template(title: &str, hour: u8) -> TaskTemplate {
        TaskTemplate::new(
            title,
            RecurrenceRule::Daily {
                every_days: 1,
                anchor: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
                at: TimeOfDay::new(hour, 0),
            },
            NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
        )
    }

    #[tokio::test]
    async fn sync_tracks_the_template_store() {
        let scheduler = scheduler();
        let store = InMemoryTemplateStore::new();
        let mut water = template("Water plants", 8);
        let feed = template("Feed cat", 7);
        store.save_template(&water).unwrap();
        store.save_template(&feed).unwrap();

        let first = sync_template_schedules(&scheduler, &store, today()).unwrap();
        assert_eq!(first, SyncSummary { created: 2, updated: 0, cancelled: 0 });
        assert_eq!(
            sync_template_schedules(&scheduler, &store, today()).unwrap(),
            SyncSummary::default()
        );

        water.rule = RecurrenceRule::Daily {
            every_days: 2,
            anchor: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            at: TimeOfDay::new(8, 0),
        };
        store.save_template(&water).unwrap();
        let mut paused = feed.clone();
        paused.active = false;
        store.save_template(&paused).unwrap();

        let second = sync_template_schedules(&scheduler, &store, today()).unwrap();
        assert_eq!(second, SyncSummary { created: 0, updated: 1, cancelled: 1 });
        assert_eq!(scheduler.list_schedules(), vec![template_task_id(&water.id)]);
    }

    #[tokio::test]
    async fn ended_templates_are_not_scheduled() {
        let scheduler = scheduler();
        let store = InMemoryTemplateStore::new();
        let mut winter = template("Salt the drive", 6);
        winter.start_date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        winter.end_date = NaiveDate::from_ymd_opt(2026, 1, 31);
        store.save_template(&winter).unwrap();
        let summary = sync_template_schedules(&scheduler, &store, today()).unwrap();
        assert_eq!(summary, SyncSummary::default());
        assert!(scheduler.list_schedules().is_empty());

        // a registered template is cancelled once its end date passes
        let mut summer = template("Water plants", 8);
        summer.end_date = NaiveDate::from_ymd_opt(2026, 8, 31);
        store.save_template(&summer).unwrap();
        let summary = sync_template_schedules(&scheduler, &store, today()).unwrap();
        assert_eq!(summary.created, 1);

        let september = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
        let summary = sync_template_schedules(&scheduler, &store, september).unwrap();
        assert_eq!(summary, SyncSummary { created: 0, updated: 0, cancelled: 1 });
        assert!(scheduler.list_schedules().is_empty());
    }
}
