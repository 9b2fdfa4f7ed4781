use recur_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    /// An occurrence lifecycle call that its current status does not allow.
    #[error("Cannot move occurrence from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Not found: {id}")]
    NotFound { id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl InstanceError {
    pub fn code(&self) -> &'static str {
        match self {
            InstanceError::Database(_) => "DATABASE_ERROR",
            InstanceError::InvalidTemplate(_) => "VALIDATION_ERROR",
            InstanceError::InvalidTransition { .. } => "INVALID_TRANSITION",
            InstanceError::NotFound { .. } => "NOT_FOUND",
            InstanceError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

impl From<CoreError> for InstanceError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Serialization(e) => InstanceError::Serialization(e),
            other => InstanceError::InvalidTemplate(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, InstanceError>;
