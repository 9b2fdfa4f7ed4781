use std::sync::Mutex;

use chrono::{DateTime, Utc};
use recur_core::types::{from_timestamp, to_timestamp};
use recur_core::TaskId;
use rusqlite::{params, Connection};
use tracing::warn;

use crate::error::Result;
use crate::repository::ExecutionRecordRepository;
use crate::types::{ExecutionRecord, ExecutionStatus};

/// Initialise the execution-record schema in `conn`.
///
/// Creates the `execution_records` table (idempotent) plus indexes for the two
/// history queries: per task and by firing time.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS execution_records (
            id           TEXT    NOT NULL PRIMARY KEY,
            task_id      TEXT    NOT NULL,
            fired_at     INTEGER NOT NULL,   -- ms since epoch
            status       TEXT    NOT NULL,
            duration_ms  INTEGER,
            result       TEXT,               -- JSON or NULL
            error        TEXT,
            retry_count  INTEGER NOT NULL DEFAULT 0,
            created_at   INTEGER NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_exec_task ON execution_records (task_id, fired_at);
        CREATE INDEX IF NOT EXISTS idx_exec_fired ON execution_records (fired_at);
        ",
    )?;
    Ok(())
}

/// SQLite-backed [`ExecutionRecordRepository`].
///
/// Owns its own `Connection` so history queries never contend with other
/// subsystems sharing the database file.
pub struct SqliteExecutionRecords {
    conn: Mutex<Connection>,
}

type RecordRow = (
    String,
    String,
    i64,
    String,
    Option<i64>,
    Option<String>,
    Option<String>,
    u32,
    i64,
);

const SELECT_COLUMNS: &str = "SELECT id, task_id, fired_at, status, duration_ms, result, error,
        retry_count, created_at FROM execution_records";

impl SqliteExecutionRecords {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<ExecutionRecord>> {
        let conn = self.conn.lock().expect("execution db poisoned");
        let mut stmt = conn.prepare_cached(sql)?;
        let records = stmt
            .query_map(args, |row| {
                Ok((
                    row.get::<_, String>(0)?,         // id
                    row.get::<_, String>(1)?,         // task_id
                    row.get::<_, i64>(2)?,            // fired_at
                    row.get::<_, String>(3)?,         // status
                    row.get::<_, Option<i64>>(4)?,    // duration_ms
                    row.get::<_, Option<String>>(5)?, // result JSON
                    row.get::<_, Option<String>>(6)?, // error
                    row.get::<_, u32>(7)?,            // retry_count
                    row.get::<_, i64>(8)?,            // created_at
                ))
            })?
            .filter_map(|r| r.ok().and_then(row_to_record))
            .collect();
        Ok(records)
    }
}

fn row_to_record(row: RecordRow) -> Option<ExecutionRecord> {
    let (id, task_id, fired_at, status, duration_ms, result, error, retry_count, created_at) = row;
    let status: ExecutionStatus = match status.parse() {
        Ok(s) => s,
        Err(e) => {
            warn!(execution_id = %id, "skipping record with bad status: {e}");
            return None;
        }
    };
    let result = match result.as_deref().map(serde_json::from_str) {
        Some(Ok(value)) => Some(value),
        Some(Err(e)) => {
            warn!(execution_id = %id, "dropping unreadable result JSON: {e}");
            None
        }
        None => None,
    };
    Some(ExecutionRecord {
        id,
        task_id: TaskId(task_id),
        fired_at: from_timestamp(fired_at),
        status,
        duration_ms: duration_ms.map(|d| d.max(0) as u64),
        result,
        error,
        retry_count,
        created_at: from_timestamp(created_at),
    })
}

impl ExecutionRecordRepository for SqliteExecutionRecords {
    fn save(&self, record: &ExecutionRecord) -> Result<()> {
        let result_json = record.result.as_ref().map(serde_json::to_string).transpose()?;
        let conn = self.conn.lock().expect("execution db poisoned");
        conn.execute(
            "INSERT INTO execution_records
             (id, task_id, fired_at, status, duration_ms, result, error, retry_count, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)
             ON CONFLICT(id) DO UPDATE SET
               status=excluded.status, duration_ms=excluded.duration_ms,
               result=excluded.result, error=excluded.error,
               retry_count=excluded.retry_count",
            params![
                record.id,
                record.task_id.as_str(),
                to_timestamp(record.fired_at),
                record.status.to_string(),
                record.duration_ms.map(|d| d as i64),
                result_json,
                record.error,
                record.retry_count,
                to_timestamp(record.created_at),
            ],
        )?;
        Ok(())
    }

    fn find_by_task(&self, task_id: &TaskId) -> Result<Vec<ExecutionRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE task_id = ?1 ORDER BY fired_at");
        self.query(&sql, &[&task_id.as_str()])
    }

    fn find_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExecutionRecord>> {
        let sql =
            format!("{SELECT_COLUMNS} WHERE fired_at >= ?1 AND fired_at < ?2 ORDER BY fired_at");
        self.query(&sql, &[&to_timestamp(from), &to_timestamp(to)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn repo() -> SqliteExecutionRecords {
        SqliteExecutionRecords::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn init_db_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
    }

    #[test]
    fn final_save_overwrites_running_row() {
        let repo = repo();
        let at = Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).unwrap();
        let mut rec = ExecutionRecord::new(TaskId::from("walk-dog"), at, at);
        rec.start().unwrap();
        repo.save(&rec).unwrap();
        rec.fail_attempt("push gateway down", 1, 40).unwrap();
        repo.save(&rec).unwrap();

        let stored = repo.find_by_task(&TaskId::from("walk-dog")).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, ExecutionStatus::Failed);
        assert_eq!(stored[0].retry_count, 1);
        assert_eq!(stored[0].error.as_deref(), Some("push gateway down"));
        assert_eq!(stored[0].fired_at, at);
    }

    #[test]
    fn result_json_survives_storage() {
        let repo = repo();
        let at = Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).unwrap();
        let mut rec = ExecutionRecord::new(TaskId::from("t"), at, at);
        rec.start().unwrap();
        rec.succeed(Some(serde_json::json!({"delivered": 2})), 5).unwrap();
        repo.save(&rec).unwrap();
        let stored = repo.find_by_task(&TaskId::from("t")).unwrap();
        assert_eq!(stored[0].result, Some(serde_json::json!({"delivered": 2})));
        assert_eq!(stored[0].duration_ms, Some(5));
    }

    #[test]
    fn range_query_filters_by_fired_at() {
        let repo = repo();
        let base = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
        for day in 0..5 {
            let at = base + Duration::days(day);
            repo.save(&ExecutionRecord::new(TaskId::from("t"), at, at)).unwrap();
        }
        let found = repo
            .find_by_date_range(base + Duration::days(1), base + Duration::days(3))
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].fired_at, base + Duration::days(1));
    }
}
