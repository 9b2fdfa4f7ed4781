use recur_core::types::{from_timestamp, to_timestamp};
use recur_core::{RecurrenceRule, Timestamp};
use tracing::debug;

/// Compute the next execution time for `rule` strictly *after* `from`.
///
/// Returns `None` when the rule is exhausted (a `Once` whose instant has
/// passed, or a `Custom` list with no later date).
pub fn compute_next_run(rule: &RecurrenceRule, from: Timestamp) -> Option<Timestamp> {
    let next = rule.next_fire_after(from_timestamp(from)).map(to_timestamp);
    if next.is_none() {
        debug!(from, "recurrence rule exhausted; no next run");
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use recur_core::TimeOfDay;

    fn ts(y: i32, m: u32, d: u32, h: u32, min: u32) -> Timestamp {
        to_timestamp(Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap())
    }

    #[test]
    fn once_in_past_is_exhausted() {
        let rule = RecurrenceRule::Once {
            at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        };
        assert_eq!(compute_next_run(&rule, ts(2026, 1, 2, 0, 0)), None);
        assert_eq!(compute_next_run(&rule, ts(2025, 12, 31, 0, 0)), Some(ts(2026, 1, 1, 0, 0)));
    }

    #[test]
    fn weekly_wraps_to_next_week_when_slot_passed() {
        // 2026-03-04 is a Wednesday; the Wednesday 09:00 slot has passed at 10:00.
        let rule = RecurrenceRule::Weekly {
            days: vec![2],
            at: TimeOfDay::new(9, 0),
        };
        assert_eq!(compute_next_run(&rule, ts(2026, 3, 4, 10, 0)), Some(ts(2026, 3, 11, 9, 0)));
        assert_eq!(compute_next_run(&rule, ts(2026, 3, 4, 8, 0)), Some(ts(2026, 3, 4, 9, 0)));
    }

    #[test]
    fn next_run_strictly_increases_across_firings() {
        let rule = RecurrenceRule::Daily {
            every_days: 2,
            anchor: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            at: TimeOfDay::new(7, 30),
        };
        let mut cursor = ts(2026, 1, 1, 0, 0);
        for _ in 0..20 {
            let next = compute_next_run(&rule, cursor).unwrap();
            assert!(next > cursor);
            cursor = next;
        }
        assert_eq!(cursor, ts(2026, 2, 8, 7, 30));
    }
}
