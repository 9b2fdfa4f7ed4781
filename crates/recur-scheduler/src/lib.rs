//! `recur-scheduler`: heap-driven recurring-task scheduler.
//!
//! # Overview
//!
//! A [`Scheduler`] keeps the next run of every enabled task in an
//! [`IndexedHeap`] and arms a single timer, through a [`TimeSource`], for the
//! earliest entry. When the timer fires every due task is extracted, handed to
//! its [`JobHandler`] and written as an [`ExecutionRecord`]; the task's
//! following run is then computed from its recurrence rule and reinserted.
//!
//! # Loop phases
//!
//! | Phase    | Meaning                                                |
//! |----------|--------------------------------------------------------|
//! | `Idle`   | Heap empty, nothing armed                              |
//! | `Armed`  | Timer armed for the heap minimum                       |
//! | `Firing` | A wake is extracting; registrations are deferred       |
//!
//! Failed or panicking jobs are retried on the same record up to
//! `max_retry_count` attempts before the record is finalized `failed`.

pub mod db;
pub mod engine;
pub mod error;
pub mod execution;
pub mod handler;
pub mod heap;
pub mod repository;
pub mod schedule;
pub mod time;
pub mod types;

pub use db::SqliteExecutionRecords;
pub use engine::Scheduler;
pub use error::{Result, SchedulerError};
pub use handler::{HandlerRegistry, JobHandler, JobOutput, JobVariant};
pub use heap::{HeapItem, IndexedHeap};
pub use repository::{ExecutionRecordRepository, InMemoryExecutionRecords};
pub use time::{ManualTimeSource, SystemTimeSource, TimeSource};
pub use types::{ExecutionRecord, ExecutionStatus, LoopPhase, ScheduleTask, SchedulerEvent};
