//! Error types for tallerflow.
//!
//! Every error carries a stable code and a category so that callers (the
//! technician and admin UIs) can tell "this action is no longer valid" apart
//! from "try again" and "contact support" without parsing messages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::TimerStatus;

/// Result type alias for tallerflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// tallerflow error types.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Work order not found: {0}")]
    OrderNotFound(String),

    #[error("Work order already exists: {0}")]
    OrderExists(String),

    #[error("Illegal transition from '{from}' to '{to}'")]
    IllegalTransition { from: String, to: String },

    #[error("Cannot {operation} timer while it is {status}")]
    InvalidTimerTransition {
        operation: &'static str,
        status: TimerStatus,
    },

    #[error("Unknown or inactive wait cause: {0}")]
    UnknownWaitCause(String),

    #[error("Concurrent modification of work order {0}")]
    ConcurrentModification(String),

    #[error("Stage not found: {0}")]
    StageNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Error::OrderExists(_) => "ORDER_EXISTS",
            Error::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            Error::InvalidTimerTransition { .. } => "INVALID_TIMER_TRANSITION",
            Error::UnknownWaitCause(_) => "UNKNOWN_WAIT_CAUSE",
            Error::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            Error::StageNotFound(_) => "STAGE_NOT_FOUND",
            Error::Storage(_) | Error::Database(_) => "PERSISTENCE_FAILURE",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Parse(_) => "PARSE_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Yaml(_) => "YAML_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Get the category the UI uses to pick its messaging.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::IllegalTransition { .. }
            | Error::InvalidTimerTransition { .. }
            | Error::UnknownWaitCause(_) => ErrorCategory::NoLongerValid,

            Error::ConcurrentModification(_) => ErrorCategory::Retry,

            Error::OrderNotFound(_)
            | Error::OrderExists(_)
            | Error::StageNotFound(_)
            | Error::Parse(_)
            | Error::Validation(_)
            | Error::Yaml(_)
            | Error::Json(_) => ErrorCategory::ClientError,

            Error::Storage(_)
            | Error::Database(_)
            | Error::Config(_)
            | Error::Internal(_)
            | Error::Io(_) => ErrorCategory::ContactSupport,
        }
    }

    /// Get the HTTP status code mapping.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::OrderNotFound(_) | Error::StageNotFound(_) => 404,
            Error::OrderExists(_)
            | Error::IllegalTransition { .. }
            | Error::InvalidTimerTransition { .. }
            | Error::ConcurrentModification(_) => 409,
            Error::UnknownWaitCause(_) => 422,
            Error::Parse(_) | Error::Validation(_) | Error::Yaml(_) | Error::Json(_) => 400,
            Error::Storage(_)
            | Error::Database(_)
            | Error::Config(_)
            | Error::Internal(_)
            | Error::Io(_) => 500,
        }
    }

    /// Get a sanitized error message safe for external consumers.
    ///
    /// Hides SQL statements, file paths and other internal details.
    pub fn external_message(&self) -> String {
        match self {
            Error::Storage(_) | Error::Database(_) => "A persistence error occurred".to_string(),
            Error::Internal(_) => "An internal error occurred".to_string(),
            Error::Io(_) => "An I/O error occurred".to_string(),
            Error::Config(_) => "A configuration error occurred".to_string(),
            Error::Yaml(_) => "Invalid YAML format".to_string(),
            Error::Json(_) => "Invalid JSON format".to_string(),
            other => other.to_string(),
        }
    }

    /// Convert to a JSON response body with a sanitized message.
    pub fn to_external_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": {
                "code": self.code(),
                "category": self.category(),
                "message": self.external_message(),
            }
        })
    }
}

/// Error categories, one per kind of UI reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad request or missing entity. Fix the request before retrying.
    ClientError,
    /// The action no longer applies to the current state. Refresh and reconsider.
    NoLongerValid,
    /// Lost a race against another writer. Safe to retry after a refresh.
    Retry,
    /// Server-side failure. Retrying is unlikely to help.
    ContactSupport,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::ClientError => write!(f, "client_error"),
            ErrorCategory::NoLongerValid => write!(f, "no_longer_valid"),
            ErrorCategory::Retry => write!(f, "retry"),
            ErrorCategory::ContactSupport => write!(f, "contact_support"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::OrderNotFound("o".into()).code(), "ORDER_NOT_FOUND");
        assert_eq!(
            Error::IllegalTransition {
                from: "ENTREGA".into(),
                to: "DIAGNOSTICO".into()
            }
            .code(),
            "ILLEGAL_TRANSITION"
        );
        assert_eq!(
            Error::InvalidTimerTransition {
                operation: "pause",
                status: TimerStatus::Stopped
            }
            .code(),
            "INVALID_TIMER_TRANSITION"
        );
        assert_eq!(Error::UnknownWaitCause("x".into()).code(), "UNKNOWN_WAIT_CAUSE");
        assert_eq!(
            Error::ConcurrentModification("o".into()).code(),
            "CONCURRENT_MODIFICATION"
        );
        assert_eq!(Error::Storage("disk".into()).code(), "PERSISTENCE_FAILURE");
    }

    #[test]
    fn test_categories_drive_ui_messaging() {
        assert_eq!(
            Error::UnknownWaitCause("x".into()).category(),
            ErrorCategory::NoLongerValid
        );
        assert_eq!(
            Error::ConcurrentModification("o".into()).category(),
            ErrorCategory::Retry
        );
        assert_eq!(
            Error::Storage("disk".into()).category(),
            ErrorCategory::ContactSupport
        );
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(Error::OrderNotFound("o".into()).http_status(), 404);
        assert_eq!(Error::ConcurrentModification("o".into()).http_status(), 409);
        assert_eq!(Error::UnknownWaitCause("x".into()).http_status(), 422);
        assert_eq!(Error::Internal("boom".into()).http_status(), 500);
    }

    #[test]
    fn test_external_message_hides_internal_details() {
        let err = Error::Storage("UPDATE work_orders SET ... failed".into());
        assert_eq!(err.external_message(), "A persistence error occurred");

        let json = err.to_external_json();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "PERSISTENCE_FAILURE");
        assert_eq!(json["error"]["category"], "contact_support");
    }

    #[test]
    fn test_invalid_timer_transition_message() {
        let err = Error::InvalidTimerTransition {
            operation: "resume",
            status: TimerStatus::Running,
        };
        assert_eq!(err.to_string(), "Cannot resume timer while it is running");
    }
}
