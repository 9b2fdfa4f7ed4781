use std::sync::RwLock;

use chrono::{DateTime, Utc};
use recur_core::TaskId;

use crate::error::Result;
use crate::types::ExecutionRecord;

/// Sink and history store for execution records.
///
/// `save` is an upsert keyed by record id: the loop saves a record when the
/// firing starts and again when it is finalized.
pub trait ExecutionRecordRepository: Send + Sync {
    fn save(&self, record: &ExecutionRecord) -> Result<()>;

    /// All records of one task, oldest firing first.
    fn find_by_task(&self, task_id: &TaskId) -> Result<Vec<ExecutionRecord>>;

    /// Records whose `fired_at` lies in `[from, to)`, oldest first.
    fn find_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExecutionRecord>>;
}

/// Process-local repository, used by tests and by embedders without a database.
#[derive(Default)]
pub struct InMemoryExecutionRecords {
    records: RwLock<Vec<ExecutionRecord>>,
}

impl InMemoryExecutionRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<ExecutionRecord> {
        self.records.read().expect("record store poisoned").clone()
    }
}

impl ExecutionRecordRepository for InMemoryExecutionRecords {
    fn save(&self, record: &ExecutionRecord) -> Result<()> {
        let mut records = self.records.write().expect("record store poisoned");
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    fn find_by_task(&self, task_id: &TaskId) -> Result<Vec<ExecutionRecord>> {
        let records = self.records.read().expect("record store poisoned");
        let mut found: Vec<_> = records.iter().filter(|r| &r.task_id == task_id).cloned().collect();
        found.sort_by_key(|r| r.fired_at);
        Ok(found)
    }

    fn find_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExecutionRecord>> {
        let records = self.records.read().expect("record store poisoned");
        let mut found: Vec<_> = records
            .iter()
            .filter(|r| r.fired_at >= from && r.fired_at < to)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.fired_at);
        Ok(found)
    }
}
