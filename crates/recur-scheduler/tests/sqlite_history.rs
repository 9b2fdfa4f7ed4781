// End-to-end: a weekly reminder driven by the manual clock, with execution
// history written to an on-disk SQLite database.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use recur_core::config::SchedulerConfig;
use recur_core::payload::DeliveryChannel;
use recur_core::types::to_timestamp;
use recur_core::{JobPayload, RecurrenceRule, ReminderAction, TaskId, TimeOfDay};
use recur_scheduler::{
    ExecutionRecordRepository, ExecutionStatus, HandlerRegistry, JobHandler, JobOutput,
    ManualTimeSource, Scheduler, SchedulerEvent, SqliteExecutionRecords,
};
use rusqlite::Connection;
use tokio::sync::mpsc;

struct Deliver;

#[async_trait]
impl JobHandler<ReminderAction> for Deliver {
    async fn handle(
        &self,
        _task_id: &TaskId,
        payload: &ReminderAction,
    ) -> recur_scheduler::Result<JobOutput> {
        Ok(Some(serde_json::json!({ "delivered": payload.message })))
    }
}

async fn next_fired(rx: &mut mpsc::Receiver<SchedulerEvent>) -> SchedulerEvent {
    loop {
        let event = rx.recv().await.expect("scheduler dropped its sender");
        if matches!(event, SchedulerEvent::Fired { .. }) {
            return event;
        }
    }
}

#[tokio::test]
async fn weekly_reminder_history_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("recur.db");

    // Monday 2026-03-02 00:00 UTC
    let start = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
    let clock = Arc::new(ManualTimeSource::new(to_timestamp(start)));
    let conn = Connection::open(&db_path).unwrap();
    let records = Arc::new(SqliteExecutionRecords::new(conn).unwrap());

    let mut handlers = HandlerRegistry::new();
    handlers.register::<ReminderAction, _>(Deliver);
    let (tx, mut rx) = mpsc::channel(32);
    let config = SchedulerConfig::default();
    let scheduler =
        Scheduler::new(clock.clone(), handlers, records.clone(), config, Some(tx)).unwrap();

    let id = TaskId::from("gym");
    let rule = RecurrenceRule::Weekly {
        // Monday and Thursday
        days: vec![0, 3],
        at: TimeOfDay::new(18, 30),
    };
    let payload = JobPayload::Reminder(ReminderAction {
        channel: DeliveryChannel::Push,
        user_id: "u-42".to_string(),
        message: "Gym time".to_string(),
        session_key: None,
    });
    assert!(scheduler.create_schedule(id.clone(), rule, payload).unwrap());

    let expected = [
        Utc.with_ymd_and_hms(2026, 3, 2, 18, 30, 0).unwrap(),
        Utc.with_ymd_and_hms(2026, 3, 5, 18, 30, 0).unwrap(),
        Utc.with_ymd_and_hms(2026, 3, 9, 18, 30, 0).unwrap(),
    ];
    for at in expected {
        assert_eq!(scheduler.next_wake_at(), Some(at));
        clock.set_time(to_timestamp(at));
        match next_fired(&mut rx).await {
            SchedulerEvent::Fired { fired_at, status, .. } => {
                assert_eq!(fired_at, at);
                assert_eq!(status, ExecutionStatus::Succeeded);
            }
            _ => unreachable!(),
        }
    }
    scheduler.stop();
    drop(scheduler);
    drop(records);

    let reopened = SqliteExecutionRecords::new(Connection::open(&db_path).unwrap()).unwrap();
    let history = reopened.find_by_task(&id).unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|r| r.status == ExecutionStatus::Succeeded && r.retry_count == 0));
    assert_eq!(history[0].result, Some(serde_json::json!({ "delivered": "Gym time" })));

    let first_week = reopened
        .find_by_date_range(start, Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap())
        .unwrap();
    assert_eq!(first_week.len(), 2);
}
