//! Job handler registry.
//!
//! Handlers are registered per payload variant. The registry erases the
//! variant type behind [`JobKind`] so the loop can dispatch any
//! [`JobPayload`], while every handler is written against its concrete payload
//! struct.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use recur_core::{JobKind, JobPayload, ReminderAction, TaskDueAction, TaskId};
use tracing::debug;

use crate::error::{Result, SchedulerError};

/// Optional structured output stored on the execution record.
pub type JobOutput = Option<serde_json::Value>;

/// A payload struct that corresponds to exactly one [`JobPayload`] variant.
pub trait JobVariant: Send + Sync + 'static {
    const KIND: JobKind;

    fn from_payload(payload: &JobPayload) -> Option<&Self>;
}

impl JobVariant for ReminderAction {
    const KIND: JobKind = JobKind::Reminder;

    fn from_payload(payload: &JobPayload) -> Option<&Self> {
        match payload {
            JobPayload::Reminder(action) => Some(action),
            _ => None,
        }
    }
}

impl JobVariant for TaskDueAction {
    const KIND: JobKind = JobKind::TaskDue;

    fn from_payload(payload: &JobPayload) -> Option<&Self> {
        match payload {
            JobPayload::TaskDue(action) => Some(action),
            _ => None,
        }
    }
}

/// Runs one kind of job. Returning `Err` (or panicking) marks the attempt failed.
#[async_trait]
pub trait JobHandler<V: JobVariant>: Send + Sync {
    async fn handle(&self, task_id: &TaskId, payload: &V) -> Result<JobOutput>;
}

#[async_trait]
trait ErasedHandler: Send + Sync {
    async fn call(&self, task_id: &TaskId, payload: &JobPayload) -> Result<JobOutput>;
}

struct Typed<V, H> {
    handler: H,
    _variant: PhantomData<fn() -> V>,
}

#[async_trait]
impl<V, H> ErasedHandler for Typed<V, H>
where
    V: JobVariant,
    H: JobHandler<V>,
{
    async fn call(&self, task_id: &TaskId, payload: &JobPayload) -> Result<JobOutput> {
        match V::from_payload(payload) {
            Some(variant) => self.handler.handle(task_id, variant).await,
            None => Err(SchedulerError::Execution(format!(
                "{} payload routed to {} handler",
                payload.kind(),
                V::KIND
            ))),
        }
    }
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, Arc<dyn ErasedHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for variant `V`, replacing any previous one.
    pub fn register<V, H>(&mut self, handler: H) -> &mut Self
    where
        V: JobVariant,
        H: JobHandler<V> + 'static,
    {
        let erased: Arc<dyn ErasedHandler> = Arc::new(Typed {
            handler,
            _variant: PhantomData::<fn() -> V>,
        });
        if self.handlers.insert(V::KIND, erased).is_some() {
            debug!(kind = %V::KIND, "job handler replaced");
        } else {
            debug!(kind = %V::KIND, "job handler registered");
        }
        self
    }

    pub fn has(&self, kind: JobKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Route `payload` to the handler registered for its kind.
    pub async fn dispatch(&self, task_id: &TaskId, payload: &JobPayload) -> Result<JobOutput> {
        let kind = payload.kind();
        let handler = self
            .handlers
            .get(&kind)
            .ok_or_else(|| {
                SchedulerError::Execution(format!("no handler registered for {kind} jobs"))
            })?;
        handler.call(task_id, payload).await
    }
}
