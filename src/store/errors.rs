//! Store error type
//!
//! Errors reported by a document store keep the store's numeric code and
//! code name so callers can match on a stable condition rather than on
//! message text.

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Operation exceeded its `maxTimeMS` budget
pub const MAX_TIME_MS_EXPIRED: i32 = 50;
/// Collection already exists
pub const NAMESPACE_EXISTS: i32 = 48;
/// Collection does not exist
pub const NAMESPACE_NOT_FOUND: i32 = 26;
/// Malformed argument
pub const BAD_VALUE: i32 = 2;
/// Unknown command
pub const COMMAND_NOT_FOUND: i32 = 59;
/// Unique key violation
pub const DUPLICATE_KEY: i32 = 11000;
/// Document rejected by the collection validator
pub const DOCUMENT_VALIDATION_FAILURE: i32 = 121;
/// Two update operators address the same path
pub const CONFLICTING_UPDATE_OPERATORS: i32 = 40;

/// An error reported by the document store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StoreError {
    pub code: i32,
    pub code_name: String,
    pub message: String,
}

impl StoreError {
    pub fn new(code: i32, code_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            code_name: code_name.into(),
            message: message.into(),
        }
    }

    /// The time-budget condition
    pub fn time_budget_exceeded() -> Self {
        Self::new(
            MAX_TIME_MS_EXPIRED,
            "MaxTimeMSExpired",
            "operation exceeded time limit",
        )
    }

    pub fn namespace_exists(namespace: &str) -> Self {
        Self::new(
            NAMESPACE_EXISTS,
            "NamespaceExists",
            format!("Collection {} already exists", namespace),
        )
    }

    pub fn namespace_not_found(namespace: &str) -> Self {
        Self::new(
            NAMESPACE_NOT_FOUND,
            "NamespaceNotFound",
            format!("ns does not exist: {}", namespace),
        )
    }

    pub fn bad_value(message: impl Into<String>) -> Self {
        Self::new(BAD_VALUE, "BadValue", message)
    }

    pub fn command_not_found(command: &str) -> Self {
        Self::new(
            COMMAND_NOT_FOUND,
            "CommandNotFound",
            format!("no such command: '{}'", command),
        )
    }

    pub fn duplicate_key(collection: &str, id: &bson::Bson) -> Self {
        Self::new(
            DUPLICATE_KEY,
            "DuplicateKey",
            format!(
                "E11000 duplicate key error collection: {} dup key: {{ _id: {} }}",
                collection, id
            ),
        )
    }

    pub fn validation_failed(reason: impl std::fmt::Display) -> Self {
        Self::new(
            DOCUMENT_VALIDATION_FAILURE,
            "DocumentValidationFailure",
            format!("Document failed validation: {}", reason),
        )
    }

    pub fn conflicting_paths(path: &str, conflict: &str) -> Self {
        Self::new(
            CONFLICTING_UPDATE_OPERATORS,
            "ConflictingUpdateOperators",
            format!(
                "Updating the path '{}' would create a conflict at '{}'",
                path, conflict
            ),
        )
    }

    /// Returns whether the store gave up because of the time budget
    pub fn is_time_budget_exceeded(&self) -> bool {
        self.code == MAX_TIME_MS_EXPIRED
    }

    /// Same error kind with a replaced message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_budget_detection() {
        assert!(StoreError::time_budget_exceeded().is_time_budget_exceeded());
        assert!(!StoreError::bad_value("x").is_time_budget_exceeded());
    }

    #[test]
    fn test_with_message_keeps_kind() {
        let err = StoreError::time_budget_exceeded().with_message("slow");
        assert_eq!(err.code, MAX_TIME_MS_EXPIRED);
        assert_eq!(err.code_name, "MaxTimeMSExpired");
        assert_eq!(err.to_string(), "slow");
    }
}
