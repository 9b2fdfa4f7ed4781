use recur_core::CoreError;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The recurrence rule or payload is malformed; the task never enters the heap.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No task with the given ID is registered.
    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    /// `create_schedule` was called with an ID that is already registered.
    #[error("Task already registered: {id}")]
    AlreadyRegistered { id: String },

    /// A job handler failed or panicked.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// The execution-record sink could not store a record.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A lifecycle transition was attempted on a finalized execution record.
    #[error("Execution record {id} is already {status}")]
    RecordFinalized { id: String, status: String },

    /// The scheduler was constructed outside of a Tokio runtime.
    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SchedulerError {
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Database(_) => "DATABASE_ERROR",
            SchedulerError::InvalidSchedule(_) => "VALIDATION_ERROR",
            SchedulerError::TaskNotFound { .. } => "NOT_FOUND",
            SchedulerError::AlreadyRegistered { .. } => "ALREADY_REGISTERED",
            SchedulerError::Execution(_) => "EXECUTION_ERROR",
            SchedulerError::Persistence(_) => "PERSISTENCE_ERROR",
            SchedulerError::RecordFinalized { .. } => "RECORD_FINALIZED",
            SchedulerError::Runtime(_) => "RUNTIME_ERROR",
            SchedulerError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

impl From<CoreError> for SchedulerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => SchedulerError::InvalidSchedule(msg),
            CoreError::Serialization(e) => SchedulerError::Serialization(e),
            other => SchedulerError::InvalidSchedule(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_validation_maps_to_invalid_schedule() {
        let err: SchedulerError = CoreError::Validation("empty day set".to_string()).into();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn not_found_message() {
        let err = SchedulerError::TaskNotFound { id: "t-1".to_string() };
        assert_eq!(err.to_string(), "Task not found: t-1");
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
