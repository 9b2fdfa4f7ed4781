//! Running one firing: handler dispatch, retries, record persistence and
//! event emission.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use recur_core::config::SchedulerConfig;
use recur_core::types::from_timestamp;
use recur_core::{JobPayload, TaskId, Timestamp};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::SchedulerError;
use crate::handler::HandlerRegistry;
use crate::repository::ExecutionRecordRepository;
use crate::time::TimeSource;
use crate::types::{ExecutionRecord, ExecutionStatus, SchedulerEvent};

/// Collaborators shared by every firing of one scheduler.
pub struct ExecutionContext {
    pub handlers: Arc<HandlerRegistry>,
    pub records: Arc<dyn ExecutionRecordRepository>,
    pub events: Option<mpsc::Sender<SchedulerEvent>>,
    pub config: SchedulerConfig,
    pub time: Arc<dyn TimeSource>,
}

/// A due task extracted from the heap during one wake.
#[derive(Debug, Clone)]
pub struct Firing {
    pub task_id: TaskId,
    pub payload: JobPayload,
    /// Heap score the task was due at.
    pub scheduled_at: Timestamp,
    /// Clock reading of the wake that extracted it.
    pub fired_at: Timestamp,
}

impl ExecutionContext {
    /// Execute one firing to a terminal record.
    ///
    /// Never returns an error: handler failures and panics become failed
    /// attempts, persistence failures are logged after the bounded retries.
    pub async fn run_firing(&self, firing: Firing) -> ExecutionRecord {
        let fired_at = from_timestamp(firing.fired_at);
        let created_at = from_timestamp(self.time.now());
        let mut record = ExecutionRecord::new(firing.task_id.clone(), fired_at, created_at);
        if let Err(e) = record.start() {
            // fresh records are always open
            error!(task_id = %firing.task_id, "could not start execution record: {e}");
        }
        self.persist(&record).await;

        let max = self.config.max_retry_count.max(1);
        loop {
            let attempt = record.retry_count + 1;
            let started = Instant::now();
            let outcome = AssertUnwindSafe(self.handlers.dispatch(&firing.task_id, &firing.payload))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(SchedulerError::Execution(panic_message(panic))));
            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(output) => {
                    if let Err(e) = record.succeed(output, duration_ms) {
                        error!(execution_id = %record.id, "{e}");
                    }
                    debug!(
                        task_id = %firing.task_id,
                        execution_id = %record.id,
                        attempt,
                        duration_ms,
                        "job succeeded"
                    );
                    break;
                }
                Err(e) => {
                    warn!(
                        task_id = %firing.task_id,
                        execution_id = %record.id,
                        attempt,
                        "job attempt failed: {e}"
                    );
                    match record.fail_attempt(e.to_string(), max, duration_ms) {
                        Ok(true) => continue,
                        Ok(false) => break,
                        Err(e) => {
                            error!(execution_id = %record.id, "{e}");
                            break;
                        }
                    }
                }
            }
        }

        self.persist(&record).await;

        if record.status == ExecutionStatus::Failed {
            error!(
                task_id = %firing.task_id,
                execution_id = %record.id,
                retry_count = record.retry_count,
                "job failed after exhausting retries"
            );
            self.deliver(SchedulerEvent::RetriesExhausted {
                id: firing.task_id.clone(),
                execution_id: record.id.clone(),
                retry_count: record.retry_count,
                error: record.error.clone(),
            })
            .await;
            if let Some(template_id) = firing.payload.template_id() {
                self.deliver(SchedulerEvent::OccurrenceExpired {
                    id: firing.task_id.clone(),
                    template_id: template_id.to_string(),
                    instance_date: from_timestamp(firing.scheduled_at).date_naive(),
                })
                .await;
            }
        }

        info!(task_id = %firing.task_id, status = %record.status, "task fired");
        self.emit(SchedulerEvent::Fired {
            id: firing.task_id,
            payload: firing.payload,
            fired_at,
            status: record.status,
        });
        record
    }

    /// Save with linear backoff; a record that still cannot be stored is
    /// logged and dropped, the firing itself stands.
    async fn persist(&self, record: &ExecutionRecord) {
        let attempts = self.config.persist_attempts.max(1);
        for attempt in 1..=attempts {
            match self.records.save(record) {
                Ok(()) => return,
                Err(e) if attempt < attempts => {
                    warn!(
                        execution_id = %record.id,
                        attempt,
                        "saving execution record failed, retrying: {e}"
                    );
                    let backoff = self.config.persist_backoff_ms * attempt as u64;
                    if backoff > 0 {
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
                Err(e) => {
                    let err = SchedulerError::Persistence(e.to_string());
                    error!(
                        execution_id = %record.id,
                        status = %record.status,
                        "giving up on execution record: {err}"
                    );
                }
            }
        }
    }

    /// Lifecycle events wait for channel capacity; the consumer acts on them.
    async fn deliver(&self, event: SchedulerEvent) {
        let Some(tx) = &self.events else { return };
        if let Err(e) = tx.send(event).await {
            warn!("scheduler event undeliverable, receiver gone: {e}");
        }
    }

    /// Informational events never hold up the firing.
    fn emit(&self, event: SchedulerEvent) {
        let Some(tx) = &self.events else { return };
        if let Err(e) = tx.try_send(event) {
            warn!("scheduler event dropped: {e}");
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    format!("handler panicked: {detail}")
}
