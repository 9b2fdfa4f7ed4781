//! The scheduler loop.
//!
//! One [`IndexedHeap`] holds the next run of every enabled task and a single
//! timer is armed for the heap minimum. A wake drains every due entry,
//! dispatches the firings on one spawned task, reinserts the following runs
//! and rearms. All loop state lives behind one mutex that is never held while
//! job handlers run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use recur_core::config::SchedulerConfig;
use recur_core::types::{from_timestamp, to_timestamp};
use recur_core::{JobPayload, RecurrenceRule, TaskId, Timestamp};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, SchedulerError};
use crate::execution::{ExecutionContext, Firing};
use crate::handler::HandlerRegistry;
use crate::heap::IndexedHeap;
use crate::repository::ExecutionRecordRepository;
use crate::schedule::compute_next_run;
use crate::time::{TimeSource, TimerToken};
use crate::types::{LoopPhase, ScheduleTask, SchedulerEvent};

/// Handle to one scheduler instance. Clones share the same loop.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<LoopState>,
    time: Arc<dyn TimeSource>,
    exec: Arc<ExecutionContext>,
    runtime: Handle,
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    token: TimerToken,
    target: Timestamp,
    epoch: u64,
}

struct LoopState {
    heap: IndexedHeap<TaskId>,
    tasks: HashMap<TaskId, ScheduleTask>,
    /// Registration order, for `list_schedules`.
    order: Vec<TaskId>,
    armed: Option<Armed>,
    /// Bumped on every arm; a timer whose epoch is stale is ignored.
    epoch: u64,
    phase: LoopPhase,
    /// Tasks whose heap entry must be brought in line with their task state
    /// once the current wake has finished extracting.
    deferred: Vec<TaskId>,
    stopped: bool,
}

impl Scheduler {
    /// Build a scheduler on the current Tokio runtime.
    ///
    /// Firings run on that runtime; `events` receives a [`SchedulerEvent`]
    /// for every firing when provided.
    pub fn new(
        time: Arc<dyn TimeSource>,
        handlers: HandlerRegistry,
        records: Arc<dyn ExecutionRecordRepository>,
        config: SchedulerConfig,
        events: Option<mpsc::Sender<SchedulerEvent>>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| SchedulerError::Runtime(format!("scheduler needs a Tokio runtime: {e}")))?;
        let exec = Arc::new(ExecutionContext {
            handlers: Arc::new(handlers),
            records,
            events,
            config,
            time: Arc::clone(&time),
        });
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LoopState {
                    heap: IndexedHeap::new(),
                    tasks: HashMap::new(),
                    order: Vec::new(),
                    armed: None,
                    epoch: 0,
                    phase: LoopPhase::Idle,
                    deferred: Vec::new(),
                    stopped: false,
                }),
                time,
                exec,
                runtime,
            }),
        })
    }

    /// Register a new recurring task.
    ///
    /// Returns `true` when the task was queued, `false` when its rule has no
    /// upcoming run (it stays registered but never fires).
    pub fn create_schedule(
        &self,
        id: TaskId,
        rule: RecurrenceRule,
        payload: JobPayload,
    ) -> Result<bool> {
        rule.validate()?;
        payload.validate()?;

        let mut state = self.shared.lock();
        ensure_running(&state)?;
        if state.tasks.contains_key(&id) {
            return Err(SchedulerError::AlreadyRegistered { id: id.to_string() });
        }
        let now = self.shared.time.now();
        let next = first_run(&rule, now, None);
        let created = from_timestamp(now);
        state.tasks.insert(
            id.clone(),
            ScheduleTask {
                id: id.clone(),
                rule,
                payload,
                enabled: true,
                last_run_at: None,
                next_run_at: next.map(from_timestamp),
                created_at: created,
                updated_at: created,
            },
        );
        state.order.push(id.clone());
        info!(task_id = %id, next_run = ?next.map(from_timestamp), "schedule created");
        self.shared.sync_task(&mut state, id);
        Ok(next.is_some())
    }

    /// Replace the rule and payload of a registered task and recompute its next run.
    pub fn update_schedule(
        &self,
        id: TaskId,
        rule: RecurrenceRule,
        payload: JobPayload,
    ) -> Result<bool> {
        rule.validate()?;
        payload.validate()?;

        let mut state = self.shared.lock();
        ensure_running(&state)?;
        let now = self.shared.time.now();
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::TaskNotFound { id: id.to_string() })?;
        let next = if task.enabled {
            first_run(&rule, now, task.last_run_at)
        } else {
            None
        };
        task.rule = rule;
        task.payload = payload;
        task.next_run_at = next.map(from_timestamp);
        task.updated_at = from_timestamp(now);
        info!(task_id = %id, next_run = ?task.next_run_at, "schedule updated");
        self.shared.sync_task(&mut state, id);
        Ok(next.is_some())
    }

    /// Unregister a task. A firing already extracted still completes.
    ///
    /// Returns whether a pending run was dropped.
    pub fn cancel_schedule(&self, id: &TaskId) -> Result<bool> {
        let mut state = self.shared.lock();
        let task = state
            .tasks
            .remove(id)
            .ok_or_else(|| SchedulerError::TaskNotFound { id: id.to_string() })?;
        state.order.retain(|t| t != id);
        info!(task_id = %id, "schedule cancelled");
        self.shared.sync_task(&mut state, id.clone());
        Ok(task.enabled && task.next_run_at.is_some())
    }

    /// Pause or resume a task. Resuming recomputes the next run from now.
    pub fn set_enabled(&self, id: &TaskId, enabled: bool) -> Result<bool> {
        let mut state = self.shared.lock();
        ensure_running(&state)?;
        let now = self.shared.time.now();
        let task = state
            .tasks
            .get_mut(id)
            .ok_or_else(|| SchedulerError::TaskNotFound { id: id.to_string() })?;
        if task.enabled == enabled {
            return Ok(enabled && task.next_run_at.is_some());
        }
        task.enabled = enabled;
        task.next_run_at = if enabled {
            first_run(&task.rule, now, task.last_run_at).map(from_timestamp)
        } else {
            None
        };
        task.updated_at = from_timestamp(now);
        let queued = task.next_run_at.is_some();
        info!(task_id = %id, enabled, "schedule toggled");
        self.shared.sync_task(&mut state, id.clone());
        Ok(queued)
    }

    /// Registered task ids in registration order.
    pub fn list_schedules(&self) -> Vec<TaskId> {
        self.shared.lock().order.clone()
    }

    pub fn get_schedule(&self, id: &TaskId) -> Option<ScheduleTask> {
        self.shared.lock().tasks.get(id).cloned()
    }

    pub fn phase(&self) -> LoopPhase {
        self.shared.lock().phase
    }

    /// Target of the armed timer, if any.
    pub fn next_wake_at(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().armed.map(|a| from_timestamp(a.target))
    }

    /// Disarm the loop. Registered tasks are kept but never fire again;
    /// firings already dispatched run to completion.
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        if let Some(armed) = state.armed.take() {
            self.shared.time.cancel_timer(armed.token);
        }
        state.heap.clear();
        state.deferred.clear();
        state.stopped = true;
        state.phase = LoopPhase::Idle;
        info!(tasks = state.tasks.len(), "scheduler stopped");
    }
}

fn ensure_running(state: &LoopState) -> Result<()> {
    if state.stopped {
        return Err(SchedulerError::Runtime("scheduler is stopped".to_string()));
    }
    Ok(())
}

/// First run at or after `now` and strictly after the last firing, so an
/// edit never puts back a slot that already fired.
fn first_run(
    rule: &RecurrenceRule,
    now: Timestamp,
    last_run_at: Option<DateTime<Utc>>,
) -> Option<Timestamp> {
    let floor = last_run_at.map_or(now - 1, |last| (now - 1).max(to_timestamp(last)));
    compute_next_run(rule, floor)
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().expect("scheduler state poisoned")
    }

    /// Bring the heap entry of `id` in line with its task state, or queue
    /// that until the running wake has reinserted its firings.
    fn sync_task(self: &Arc<Self>, state: &mut LoopState, id: TaskId) {
        if state.phase == LoopPhase::Firing {
            trace!(task_id = %id, "wake in progress; heap change deferred");
            state.deferred.push(id);
            return;
        }
        apply_to_heap(state, &id);
        self.rearm(state);
    }

    /// Arm the timer for the heap minimum, or go idle on an empty heap.
    fn rearm(self: &Arc<Self>, state: &mut LoopState) {
        let min = state.heap.peek().map(|item| item.score);
        if let (Some(target), Some(armed)) = (min, state.armed) {
            if armed.target == target {
                state.phase = LoopPhase::Armed;
                return;
            }
        }
        if let Some(armed) = state.armed.take() {
            self.time.cancel_timer(armed.token);
        }
        let Some(target) = min else {
            state.phase = LoopPhase::Idle;
            debug!("heap empty; scheduler idle");
            return;
        };

        state.epoch += 1;
        let epoch = state.epoch;
        let delay = (target - self.time.now()).max(0) as u64;
        let weak: Weak<Shared> = Arc::downgrade(self);
        let token = self.time.set_timer(
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.on_wake(epoch);
                }
            }),
            delay,
        );
        state.armed = Some(Armed { token, target, epoch });
        state.phase = LoopPhase::Armed;
        trace!(target = %from_timestamp(target), delay_ms = delay, "timer armed");
    }

    fn on_wake(self: &Arc<Self>, epoch: u64) {
        // Extract every due task.
        let (now, firings) = {
            let mut state = self.lock();
            match state.armed {
                Some(armed) if armed.epoch == epoch && !state.stopped => {}
                _ => {
                    trace!(epoch, "stale timer ignored");
                    return;
                }
            }
            state.armed = None;
            state.phase = LoopPhase::Firing;

            let now = self.time.now();
            let due = state.heap.pop_due(now);
            let mut firings = Vec::with_capacity(due.len());
            for item in due {
                let Some(task) = state.tasks.get_mut(&item.key) else { continue };
                task.last_run_at = Some(from_timestamp(now));
                firings.push(Firing {
                    task_id: item.key,
                    payload: task.payload.clone(),
                    scheduled_at: item.score,
                    fired_at: now,
                });
            }
            (now, firings)
        };

        // Dispatch outside the lock; jobs of one wake run concurrently.
        let due: Vec<(TaskId, Timestamp)> = firings
            .iter()
            .map(|f| (f.task_id.clone(), f.scheduled_at))
            .collect();
        if !firings.is_empty() {
            debug!(count = firings.len(), "dispatching due tasks");
            let exec = Arc::clone(&self.exec);
            self.runtime.spawn(async move {
                join_all(firings.into_iter().map(|f| exec.run_firing(f))).await;
            });
        }

        // Reinsert following runs, apply queued changes, rearm.
        let mut state = self.lock();
        let deferred = std::mem::take(&mut state.deferred);
        for (id, scheduled_at) in due {
            if deferred.contains(&id) {
                continue;
            }
            let Some(task) = state.tasks.get_mut(&id) else { continue };
            if !task.enabled {
                continue;
            }
            // Missed slots coalesce into one firing; the next run is always after this one.
            let next = compute_next_run(&task.rule, scheduled_at.max(now));
            task.next_run_at = next.map(from_timestamp);
            match next {
                Some(at) => {
                    state.heap.insert(id, at);
                }
                None => debug!(task_id = %id, "rule exhausted; task leaves the heap"),
            }
        }
        for id in &deferred {
            apply_to_heap(&mut state, id);
        }
        if state.stopped {
            state.heap.clear();
            state.phase = LoopPhase::Idle;
            return;
        }
        self.rearm(&mut state);
    }
}

fn apply_to_heap(state: &mut LoopState, id: &TaskId) {
    let next = state
        .tasks
        .get(id)
        .filter(|task| task.enabled)
        .and_then(|task| task.next_run_at);
    match next {
        Some(at) => state.heap.insert(id.clone(), to_timestamp(at)),
        None => {
            if state.heap.remove(id) {
                trace!(task_id = %id, "heap entry removed");
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            if let Some(armed) = state.armed.take() {
                self.time.cancel_timer(armed.token);
            }
        } else {
            warn!("scheduler state poisoned on drop");
        }
    }
}
