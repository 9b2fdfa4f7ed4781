//! `recur-instances`: materializes recurring task templates into dated
//! occurrences.
//!
//! The [`InstanceGenerator`] is pure: given a template and a clock reading it
//! returns the occurrences of the generation window. [`RefillJob`] drives it
//! over every active template and persists the result through the
//! [`TemplateRepository`] / [`OccurrenceRepository`] traits.
//! [`detect_conflicts`] groups overlapping occurrences.

pub mod conflict;
pub mod db;
pub mod error;
pub mod generate;
pub mod refill;
pub mod repository;
pub mod types;

pub use conflict::{detect_conflicts, ConflictGroup, TimeBoxed};
pub use db::SqliteTemplateStore;
pub use error::{InstanceError, Result};
pub use generate::{GenerateOptions, InstanceGenerator};
pub use refill::{RefillJob, RefillReport};
pub use repository::{InMemoryTemplateStore, OccurrenceRepository, TemplateRepository};
pub use types::{CompletionInfo, Occurrence, OccurrenceStatus, SkipInfo, TaskTemplate, TimeWindow};
