use std::sync::Mutex;

use chrono::NaiveDate;
use recur_core::types::{from_timestamp, to_timestamp};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use crate::error::{InstanceError, Result};
use crate::repository::{OccurrenceRepository, TemplateRepository};
use crate::types::{
    CompletionInfo, Occurrence, OccurrenceStatus, SkipInfo, TaskTemplate, TimeWindow,
};

/// Initialise the template and occurrence tables in `conn`.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS task_templates (
            id                  TEXT    NOT NULL PRIMARY KEY,
            title               TEXT    NOT NULL,
            rule                TEXT    NOT NULL,   -- JSON-encoded RecurrenceRule
            duration_minutes    INTEGER NOT NULL,
            start_date          TEXT    NOT NULL,   -- YYYY-MM-DD
            end_date            TEXT,
            active              INTEGER NOT NULL DEFAULT 1,
            last_generated_date TEXT,
            created_at          INTEGER NOT NULL    -- ms since epoch
        ) STRICT;

        CREATE TABLE IF NOT EXISTS occurrences (
            id             TEXT    NOT NULL PRIMARY KEY,
            template_id    TEXT    NOT NULL,
            instance_date  TEXT    NOT NULL,
            window_start   INTEGER NOT NULL,
            window_end     INTEGER NOT NULL,
            status         TEXT    NOT NULL DEFAULT 'pending',
            started_at     INTEGER,
            completed_at   INTEGER,
            note           TEXT,
            skipped_at     INTEGER,
            skip_reason    TEXT,
            UNIQUE (template_id, instance_date)
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_occ_window ON occurrences (window_start);
        ",
    )?;
    Ok(())
}

/// SQLite-backed template and occurrence store.
pub struct SqliteTemplateStore {
    conn: Mutex<Connection>,
}

impl SqliteTemplateStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("template db poisoned")
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    raw.parse()
        .map_err(|e| InstanceError::InvalidTemplate(format!("bad stored date '{raw}': {e}")))
}

fn parse_opt_date(raw: Option<String>) -> Result<Option<NaiveDate>> {
    raw.as_deref().map(parse_date).transpose()
}

type TemplateRow = (String, String, String, u32, String, Option<String>, bool, Option<String>, i64);

fn template_from_row(row: TemplateRow) -> Result<TaskTemplate> {
    let (
        id,
        title,
        rule,
        duration_minutes,
        start_date,
        end_date,
        active,
        last_generated_date,
        created_at,
    ) = row;
    Ok(TaskTemplate {
        rule: serde_json::from_str(&rule)?,
        start_date: parse_date(&start_date)?,
        end_date: parse_opt_date(end_date)?,
        last_generated_date: parse_opt_date(last_generated_date)?,
        created_at: from_timestamp(created_at),
        id,
        title,
        duration_minutes,
        active,
    })
}

const TEMPLATE_COLUMNS: &str = "SELECT id, title, rule, duration_minutes, start_date,
        end_date, active, last_generated_date, created_at FROM task_templates";

fn read_template(row: &rusqlite::Row<'_>) -> rusqlite::Result<TemplateRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

type OccurrenceRow = (
    String,
    String,
    String,
    i64,
    i64,
    String,
    Option<i64>,
    Option<i64>,
    Option<String>,
    Option<i64>,
    Option<String>,
);

const OCCURRENCE_COLUMNS: &str = "SELECT id, template_id, instance_date, window_start,
        window_end, status, started_at, completed_at, note, skipped_at, skip_reason
        FROM occurrences";

fn read_occurrence(row: &rusqlite::Row<'_>) -> rusqlite::Result<OccurrenceRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

fn occurrence_from_row(row: OccurrenceRow) -> Result<Occurrence> {
    let (
        id,
        template_id,
        date,
        start,
        end,
        status,
        started_at,
        completed_at,
        note,
        skipped_at,
        skip_reason,
    ) = row;
    let status: OccurrenceStatus = status.parse().map_err(InstanceError::InvalidTemplate)?;
    Ok(Occurrence {
        instance_date: parse_date(&date)?,
        time_window: TimeWindow::new(from_timestamp(start), from_timestamp(end)),
        status,
        started_at: started_at.map(from_timestamp),
        completion: completed_at.map(|at| CompletionInfo {
            completed_at: from_timestamp(at),
            note,
        }),
        skip: skipped_at.map(|at| SkipInfo {
            skipped_at: from_timestamp(at),
            reason: skip_reason,
        }),
        id,
        template_id,
    })
}

/// Keep readable rows; a corrupt row is logged and skipped.
fn keep_valid<T>(rows: impl Iterator<Item = rusqlite::Result<Result<T>>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        match row? {
            Ok(item) => out.push(item),
            Err(e) => warn!("skipping unreadable row: {e}"),
        }
    }
    Ok(out)
}

impl TemplateRepository for SqliteTemplateStore {
    fn save_template(&self, template: &TaskTemplate) -> Result<()> {
        template.validate()?;
        let rule = serde_json::to_string(&template.rule)?;
        self.lock().execute(
            "INSERT INTO task_templates
             (id, title, rule, duration_minutes, start_date, end_date, active,
              last_generated_date, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)
             ON CONFLICT(id) DO UPDATE SET
               title=excluded.title, rule=excluded.rule,
               duration_minutes=excluded.duration_minutes,
               start_date=excluded.start_date, end_date=excluded.end_date,
               active=excluded.active, last_generated_date=excluded.last_generated_date",
            params![
                template.id,
                template.title,
                rule,
                template.duration_minutes,
                template.start_date.to_string(),
                template.end_date.map(|d| d.to_string()),
                template.active,
                template.last_generated_date.map(|d| d.to_string()),
                to_timestamp(template.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_template(&self, id: &str) -> Result<Option<TaskTemplate>> {
        let conn = self.lock();
        let row = conn
            .query_row(&format!("{TEMPLATE_COLUMNS} WHERE id = ?1"), [id], read_template)
            .optional()?;
        row.map(template_from_row).transpose()
    }

    fn find_active_templates(&self) -> Result<Vec<TaskTemplate>> {
        let conn = self.lock();
        let sql = format!("{TEMPLATE_COLUMNS} WHERE active = 1 ORDER BY created_at, id");
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], |row| read_template(row).map(template_from_row))?;
        keep_valid(rows)
    }

    fn update_last_generated_date(&self, id: &str, date: NaiveDate) -> Result<()> {
        let n = self.lock().execute(
            "UPDATE task_templates SET last_generated_date = ?1 WHERE id = ?2",
            params![date.to_string(), id],
        )?;
        if n == 0 {
            return Err(InstanceError::NotFound { id: id.to_string() });
        }
        Ok(())
    }
}

impl OccurrenceRepository for SqliteTemplateStore {
    fn insert_occurrences(&self, occurrences: &[Occurrence]) -> Result<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO occurrences
                 (id, template_id, instance_date, window_start, window_end, status)
                 VALUES (?1,?2,?3,?4,?5,?6)",
            )?;
            for occ in occurrences {
                inserted += stmt.execute(params![
                    occ.id,
                    occ.template_id,
                    occ.instance_date.to_string(),
                    to_timestamp(occ.time_window.start),
                    to_timestamp(occ.time_window.end),
                    occ.status.to_string(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn find_occurrence(&self, template_id: &str, date: NaiveDate) -> Result<Option<Occurrence>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("{OCCURRENCE_COLUMNS} WHERE template_id = ?1 AND instance_date = ?2"),
                params![template_id, date.to_string()],
                read_occurrence,
            )
            .optional()?;
        row.map(occurrence_from_row).transpose()
    }

    fn find_by_template(&self, template_id: &str) -> Result<Vec<Occurrence>> {
        let conn = self.lock();
        let sql = format!("{OCCURRENCE_COLUMNS} WHERE template_id = ?1 ORDER BY instance_date");
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows =
            stmt.query_map([template_id], |row| read_occurrence(row).map(occurrence_from_row))?;
        keep_valid(rows)
    }

    fn update_occurrence(&self, occurrence: &Occurrence) -> Result<()> {
        let n = self.lock().execute(
            "UPDATE occurrences SET status = ?1, started_at = ?2, completed_at = ?3, note = ?4,
                    skipped_at = ?5, skip_reason = ?6
             WHERE template_id = ?7 AND instance_date = ?8",
            params![
                occurrence.status.to_string(),
                occurrence.started_at.map(to_timestamp),
                occurrence.completion.as_ref().map(|c| to_timestamp(c.completed_at)),
                occurrence.completion.as_ref().and_then(|c| c.note.clone()),
                occurrence.skip.as_ref().map(|s| to_timestamp(s.skipped_at)),
                occurrence.skip.as_ref().and_then(|s| s.reason.clone()),
                occurrence.template_id,
                occurrence.instance_date.to_string(),
            ],
        )?;
        if n == 0 {
            return Err(InstanceError::NotFound {
                id: occurrence.id.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use recur_core::{RecurrenceRule, TimeOfDay};

    fn store() -> SqliteTemplateStore {
        SqliteTemplateStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn template() -> TaskTemplate {
        let mut tpl = TaskTemplate::new(
            "Pay rent",
            RecurrenceRule::Custom {
                dates: vec![NaiveDate::from_ymd_opt(2026, 5, 1).unwrap()],
                at: TimeOfDay::new(9, 0),
            },
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        );
        tpl.created_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        tpl
    }

    #[test]
    fn template_survives_storage() {
        let db = store();
        let mut tpl = template();
        tpl.end_date = NaiveDate::from_ymd_opt(2026, 12, 31);
        db.save_template(&tpl).unwrap();
        assert_eq!(db.get_template(&tpl.id).unwrap(), Some(tpl.clone()));
        assert_eq!(db.find_active_templates().unwrap(), vec![tpl.clone()]);

        tpl.active = false;
        db.save_template(&tpl).unwrap();
        assert!(db.find_active_templates().unwrap().is_empty());
        assert_eq!(db.get_template("missing").unwrap(), None);
    }

    #[test]
    fn horizon_update() {
        let db = store();
        let tpl = template();
        db.save_template(&tpl).unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 4, 10).unwrap();
        db.update_last_generated_date(&tpl.id, date).unwrap();
        assert_eq!(db.get_template(&tpl.id).unwrap().unwrap().last_generated_date, Some(date));
        assert_eq!(
            db.update_last_generated_date("nope", date).unwrap_err().code(),
            "NOT_FOUND"
        );
    }

    #[test]
    fn occurrences_insert_once_and_track_lifecycle() {
        let db = store();
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        let date = start.date_naive();
        let occ = Occurrence::new("tpl", date, TimeWindow::starting_at(start, 15));
        assert_eq!(db.insert_occurrences(&[occ.clone()]).unwrap(), 1);
        let dup = Occurrence::new("tpl", date, TimeWindow::starting_at(start, 15));
        assert_eq!(db.insert_occurrences(&[dup]).unwrap(), 0);

        let mut stored = db.find_occurrence("tpl", date).unwrap().unwrap();
        assert_eq!(stored, occ);
        stored.skip(start, Some("on holiday".to_string())).unwrap();
        db.update_occurrence(&stored).unwrap();

        let reread = db.find_by_template("tpl").unwrap();
        assert_eq!(reread.len(), 1);
        assert_eq!(reread[0].status, OccurrenceStatus::Skipped);
        assert_eq!(reread[0].skip.as_ref().unwrap().reason.as_deref(), Some("on holiday"));
    }
}
