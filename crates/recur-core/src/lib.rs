//! `recur-core`: types shared by every crate of the recurring-schedule engine.
//!
//! Holds the configuration layer, the recurrence rule model, the closed set of
//! job payloads, and the id/timestamp primitives the scheduler and the instance
//! generator agree on.

pub mod config;
pub mod error;
pub mod payload;
pub mod recurrence;
pub mod types;

pub use error::{CoreError, Result};
pub use payload::{DeliveryChannel, JobKind, JobPayload, ReminderAction, TaskDueAction};
pub use recurrence::{RecurrenceRule, TimeOfDay};
pub use types::{TaskId, Timestamp};
