use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Milliseconds since the Unix epoch. Every clock and heap score uses this unit.
pub type Timestamp = i64;

/// Identifier of a scheduled task (one per recurring template or one-off reminder).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        // UUIDv7 embeds the creation time, so ids sort chronologically
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Convert a UTC instant to a millisecond timestamp.
pub fn to_timestamp(at: DateTime<Utc>) -> Timestamp {
    at.timestamp_millis()
}

/// Convert a millisecond timestamp back to a UTC instant.
///
/// Out-of-range values saturate to the Unix epoch; chrono covers ±262 000 years
/// so this only triggers on corrupted input.
pub fn from_timestamp(ts: Timestamp) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_round_trip_keeps_millis() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap()
            + chrono::Duration::milliseconds(250);
        assert_eq!(from_timestamp(to_timestamp(at)), at);
    }

    #[test]
    fn task_ids_are_unique() {
        assert_ne!(TaskId::new(), TaskId::new());
    }

    #[test]
    fn task_id_display_is_raw_string() {
        assert_eq!(TaskId::from("reminder-1").to_string(), "reminder-1");
    }
}
