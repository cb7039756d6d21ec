//! Schema error types
//!
//! Error codes:
//! - SCHEMA_DUPLICATE_PROPERTY (definition time)
//! - SCHEMA_RESERVED_PROPERTY (definition time)
//! - SCHEMA_INVALID_PATTERN (definition time)
//! - SCHEMA_MALFORMED_VALIDATOR (parsing a store validator)
//! - SCHEMA_VALIDATION_FAILED (document check)

use std::fmt;

use thiserror::Error;

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Validation failure details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationDetails {
    /// Field path (e.g., "user.address.city")
    pub field: String,
    /// Expected type or condition
    pub expected: String,
    /// Actual value or type found
    pub actual: String,
}

impl ValidationDetails {
    pub fn new(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::new(field, "field to be present", "missing")
    }

    pub fn extra_field(field: impl Into<String>) -> Self {
        Self::new(field, "no undeclared fields", "extra field present")
    }

    pub fn type_mismatch(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::new(field, expected, actual)
    }
}

impl fmt::Display for ValidationDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "field '{}': expected {}, got {}",
            self.field, self.expected, self.actual
        )
    }
}

/// Schema errors
///
/// Everything except `ValidationFailed` is a definition-time error: it is
/// raised while a schema is being declared, never during a CRUD call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("Property '{0}' is declared more than once")]
    DuplicateProperty(String),

    #[error("Property '{0}' is reserved and cannot be declared")]
    ReservedProperty(String),

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Malformed validator at '{path}': {reason}")]
    MalformedValidator { path: String, reason: String },

    #[error("Document validation failed: {0}")]
    ValidationFailed(ValidationDetails),
}

impl SchemaError {
    /// Create a malformed validator error
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedValidator {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            SchemaError::DuplicateProperty(_) => "SCHEMA_DUPLICATE_PROPERTY",
            SchemaError::ReservedProperty(_) => "SCHEMA_RESERVED_PROPERTY",
            SchemaError::InvalidPattern { .. } => "SCHEMA_INVALID_PATTERN",
            SchemaError::MalformedValidator { .. } => "SCHEMA_MALFORMED_VALIDATOR",
            SchemaError::ValidationFailed(_) => "SCHEMA_VALIDATION_FAILED",
        }
    }

    /// Returns whether this error was raised while declaring a schema
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            SchemaError::DuplicateProperty(_)
                | SchemaError::ReservedProperty(_)
                | SchemaError::InvalidPattern { .. }
        )
    }

    /// Returns validation details if applicable
    pub fn details(&self) -> Option<&ValidationDetails> {
        match self {
            SchemaError::ValidationFailed(details) => Some(details),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            SchemaError::DuplicateProperty("a".into()).code(),
            "SCHEMA_DUPLICATE_PROPERTY"
        );
        assert_eq!(
            SchemaError::ReservedProperty("_id".into()).code(),
            "SCHEMA_RESERVED_PROPERTY"
        );
        assert_eq!(
            SchemaError::malformed("$", "not a document").code(),
            "SCHEMA_MALFORMED_VALIDATOR"
        );
    }

    #[test]
    fn test_definition_errors() {
        assert!(SchemaError::DuplicateProperty("a".into()).is_definition_error());
        assert!(!SchemaError::ValidationFailed(ValidationDetails::missing_field("a"))
            .is_definition_error());
    }

    #[test]
    fn test_validation_details_display() {
        let details = ValidationDetails::type_mismatch("age", "number", "string");
        let display = format!("{}", details);
        assert!(display.contains("age"));
        assert!(display.contains("number"));
        assert!(display.contains("string"));
    }
}
