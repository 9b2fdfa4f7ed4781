// Refill pass over SQLite storage, then conflict detection across the
// materialized occurrences of two templates.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use recur_core::config::GenerationConfig;
use recur_core::{RecurrenceRule, TimeOfDay};
use recur_instances::{
    detect_conflicts, InstanceGenerator, OccurrenceRepository, OccurrenceStatus, RefillJob,
    SqliteTemplateStore, TaskTemplate, TemplateRepository,
};
use rusqlite::Connection;

#[test]
fn refill_then_detect_overlaps() {
    let store = Arc::new(SqliteTemplateStore::new(Connection::open_in_memory().unwrap()).unwrap());
    let start = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();

    // 2026-06-01 is a Monday.
    let mut standup = TaskTemplate::new(
        "Stand-up",
        RecurrenceRule::Weekly {
            days: vec![0, 1, 2, 3, 4],
            at: TimeOfDay::new(9, 0),
        },
        start,
    );
    standup.duration_minutes = 15;
    let mut review = TaskTemplate::new(
        "Code review",
        RecurrenceRule::Daily {
            every_days: 7,
            anchor: NaiveDate::from_ymd_opt(2026, 6, 3).unwrap(),
            at: TimeOfDay::new(9, 10),
        },
        start,
    );
    review.duration_minutes = 60;
    store.save_template(&standup).unwrap();
    store.save_template(&review).unwrap();

    let generator = InstanceGenerator::new(GenerationConfig {
        target_generate_ahead_days: 13,
        refill_threshold_days: 3,
    });
    let job = RefillJob::new(generator, store.clone(), store.clone());
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();

    let report = job.run_once(now).unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.refilled.len(), 2);
    // weekdays Jun 1..=14: 10 stand-ups; reviews on Jun 3 and Jun 10
    assert_eq!(report.generated, 12);
    assert_eq!(
        store.get_template(&review.id).unwrap().unwrap().last_generated_date,
        Some(NaiveDate::from_ymd_opt(2026, 6, 14).unwrap())
    );

    // nothing new until the horizon nears
    assert_eq!(job.run_once(now + Duration::days(1)).unwrap().generated, 0);

    let mut all = store.find_by_template(&standup.id).unwrap();
    all.extend(store.find_by_template(&review.id).unwrap());
    let groups = detect_conflicts(&all);
    assert_eq!(groups.len(), 2);
    for group in &groups {
        assert_eq!(group.members.len(), 2);
        let dates: Vec<_> = group.members.iter().map(|&i| all[i].instance_date).collect();
        assert_eq!(dates[0], dates[1]);
    }

    // an occurrence whose due firing failed for good is expired
    let wednesday = NaiveDate::from_ymd_opt(2026, 6, 3).unwrap();
    let mut occ = store.find_occurrence(&review.id, wednesday).unwrap().unwrap();
    occ.expire().unwrap();
    store.update_occurrence(&occ).unwrap();
    assert_eq!(
        store.find_occurrence(&review.id, wednesday).unwrap().unwrap().status,
        OccurrenceStatus::Expired
    );
}
