use serde_json::{json, Value};
use thiserror::Error;

/// Stable error taxonomy for the governance core.
///
/// Every caller-visible failure maps to one of these kinds; the transport
/// layer serializes them with [`GovernanceError::envelope`].
#[derive(Error, Debug)]
pub enum GovernanceError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        details: Option<Value>,
    },

    #[error("Not found: {message}")]
    NotFound {
        message: String,
        details: Option<Value>,
    },

    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        details: Option<Value>,
    },

    #[error("Invalid state transition: {message}")]
    InvalidState {
        message: String,
        details: Option<Value>,
    },

    #[error("Forbidden: {message}")]
    Forbidden {
        message: String,
        details: Option<Value>,
    },

    #[error("Compilation failed: {message}")]
    Compilation {
        message: String,
        details: Option<Value>,
    },

    #[error("Publishing failed: {message}")]
    Publishing {
        message: String,
        details: Option<Value>,
    },

    #[error("Integrity violation: {message}")]
    Integrity {
        message: String,
        details: Option<Value>,
    },

    #[error("Dependency unavailable: {message}")]
    Unavailable {
        message: String,
        details: Option<Value>,
    },
}

impl GovernanceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation_with(message: impl Into<String>, details: Value) -> Self {
        Self::Validation {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            details: None,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            details: None,
        }
    }

    pub fn conflict_with(message: impl Into<String>, details: Value) -> Self {
        Self::Conflict {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
            details: None,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
            details: None,
        }
    }

    pub fn compilation(message: impl Into<String>, details: Value) -> Self {
        Self::Compilation {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn publishing(message: impl Into<String>) -> Self {
        Self::Publishing {
            message: message.into(),
            details: None,
        }
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
            details: None,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            details: None,
        }
    }

    /// Machine-readable kind, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "ValidationError",
            Self::NotFound { .. } => "NotFoundError",
            Self::Conflict { .. } => "ConflictError",
            Self::InvalidState { .. } => "InvalidStateError",
            Self::Forbidden { .. } => "ForbiddenError",
            Self::Compilation { .. } => "CompilationError",
            Self::Publishing { .. } => "PublishingError",
            Self::Integrity { .. } => "IntegrityError",
            Self::Unavailable { .. } => "UnavailableError",
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::Validation { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. }
            | Self::InvalidState { message, .. }
            | Self::Forbidden { message, .. }
            | Self::Compilation { message, .. }
            | Self::Publishing { message, .. }
            | Self::Integrity { message, .. }
            | Self::Unavailable { message, .. } => message,
        }
    }

    fn details(&self) -> Option<&Value> {
        match self {
            Self::Validation { details, .. }
            | Self::NotFound { details, .. }
            | Self::Conflict { details, .. }
            | Self::InvalidState { details, .. }
            | Self::Forbidden { details, .. }
            | Self::Compilation { details, .. }
            | Self::Publishing { details, .. }
            | Self::Integrity { details, .. }
            | Self::Unavailable { details, .. } => details.as_ref(),
        }
    }

    /// Wire envelope: `{"error": kind, "message": ..., "details": {...}}`.
    pub fn envelope(&self) -> Value {
        let mut body = json!({
            "error": self.kind(),
            "message": self.message(),
        });
        if let Some(details) = self.details() {
            body["details"] = details.clone();
        }
        body
    }

    /// Whether the publisher retry loop may re-attempt the failed call.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<sqlx::Error> for GovernanceError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::not_found("row not found"),
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Conflict {
                message: format!("unique constraint violated: {}", db.message()),
                details: None,
            },
            _ => Self::integrity(format!("database error: {}", err)),
        }
    }
}

impl From<serde_json::Error> for GovernanceError {
    fn from(err: serde_json::Error) -> Self {
        Self::integrity(format!("JSON serialization error: {}", err))
    }
}

impl From<reqwest::Error> for GovernanceError {
    fn from(err: reqwest::Error) -> Self {
        Self::unavailable(format!("object storage request failed: {}", err))
    }
}
