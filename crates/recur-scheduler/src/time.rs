//! Clock and one-shot timer abstraction.
//!
//! The scheduler loop never reads the wall clock or sleeps directly; it asks a
//! [`TimeSource`]. Production uses [`SystemTimeSource`] (Tokio timers), tests
//! use [`ManualTimeSource`], whose time only moves when told to.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use recur_core::Timestamp;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::trace;

/// Opaque handle returned by [`TimeSource::set_timer`].
pub type TimerToken = u64;

/// One-shot callback run when a timer expires.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

pub trait TimeSource: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now(&self) -> Timestamp;

    /// Run `callback` once, `delay_ms` from now.
    fn set_timer(&self, callback: TimerCallback, delay_ms: u64) -> TimerToken;

    /// Cancel a pending timer. Unknown or already-fired tokens are ignored.
    fn cancel_timer(&self, token: TimerToken);
}

/// Wall clock backed by Tokio's timer wheel.
pub struct SystemTimeSource {
    runtime: Handle,
    next_token: AtomicU64,
    timers: Arc<Mutex<HashMap<TimerToken, AbortHandle>>>,
}

impl SystemTimeSource {
    /// Bind to the Tokio runtime the caller is running on.
    ///
    /// Returns `None` outside of a runtime.
    pub fn new() -> Option<Self> {
        Handle::try_current().ok().map(Self::with_handle)
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            runtime,
            next_token: AtomicU64::new(1),
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp_millis()
    }

    fn set_timer(&self, callback: TimerCallback, delay_ms: u64) -> TimerToken {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);

        // Hold the map lock across spawn so the task cannot look itself up
        // before its abort handle is registered.
        let mut armed = self.timers.lock().expect("timer map poisoned");
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let still_armed = timers
                .lock()
                .expect("timer map poisoned")
                .remove(&token)
                .is_some();
            if still_armed {
                callback();
            }
        });
        armed.insert(token, task.abort_handle());
        token
    }

    fn cancel_timer(&self, token: TimerToken) {
        let handle = self.timers.lock().expect("timer map poisoned").remove(&token);
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Deterministic clock for tests: time only advances through [`tick`](Self::tick)
/// and [`set_time`](Self::set_time), which run due callbacks synchronously.
pub struct ManualTimeSource {
    state: Mutex<ManualState>,
}

struct ManualState {
    now: Timestamp,
    next_token: TimerToken,
    /// Keyed by `(trigger_at, token)` so iteration order is trigger time, then
    /// registration order.
    pending: BTreeMap<(Timestamp, TimerToken), TimerCallback>,
    trigger_at: HashMap<TimerToken, Timestamp>,
}

impl ManualTimeSource {
    pub fn new(start: Timestamp) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: start,
                next_token: 1,
                pending: BTreeMap::new(),
                trigger_at: HashMap::new(),
            }),
        }
    }

    /// Advance time by `ms` and run every callback that is now due.
    /// Returns how many callbacks fired.
    pub fn tick(&self, ms: u64) -> usize {
        {
            let mut state = self.lock();
            state.now += ms as Timestamp;
        }
        self.fire_due()
    }

    /// Jump to an absolute time and run every callback that is now due.
    pub fn set_time(&self, at: Timestamp) -> usize {
        {
            let mut state = self.lock();
            state.now = at;
        }
        self.fire_due()
    }

    /// Number of timers still waiting to fire.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Pop and run due callbacks one at a time, releasing the lock around each
    /// call so a callback may arm new timers. Timers armed during the sweep
    /// that are already due fire in this same sweep.
    fn fire_due(&self) -> usize {
        let mut fired = 0;
        loop {
            let callback = {
                let mut state = self.lock();
                let now = state.now;
                let due_key = state
                    .pending
                    .keys()
                    .next()
                    .copied()
                    .filter(|(trigger_at, _)| *trigger_at <= now);
                match due_key {
                    Some(key) => {
                        state.trigger_at.remove(&key.1);
                        state.pending.remove(&key)
                    }
                    None => None,
                }
            };
            match callback {
                Some(callback) => {
                    callback();
                    fired += 1;
                }
                None => break,
            }
        }
        if fired > 0 {
            trace!(fired, "manual clock fired timers");
        }
        fired
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().expect("manual clock poisoned")
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        self.lock().now
    }

    fn set_timer(&self, callback: TimerCallback, delay_ms: u64) -> TimerToken {
        let mut state = self.lock();
        let token = state.next_token;
        state.next_token += 1;
        let trigger_at = state.now + delay_ms as Timestamp;
        state.pending.insert((trigger_at, token), callback);
        state.trigger_at.insert(token, trigger_at);
        token
    }

    fn cancel_timer(&self, token: TimerToken) {
        let mut state = self.lock();
        if let Some(trigger_at) = state.trigger_at.remove(&token) {
            state.pending.remove(&(trigger_at, token));
        }
    }
}
