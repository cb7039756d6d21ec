//! Model error types
//!
//! Error codes:
//! - MODEL_NOT_INITIALIZED: call before a database was connected
//! - MODEL_NOT_ACKNOWLEDGED: write accepted without acknowledgement
//! - MODEL_OPERATION_FAILED: store reported no success indicator
//! - MODEL_NULL_RESULT: store succeeded but returned no document
//! - MODEL_HOOK_FAILED, MODEL_SERIALIZATION, MODEL_UNKNOWN
//! - store and schema errors keep their own codes

use thiserror::Error;

use crate::schema::SchemaError;
use crate::store::StoreError;

/// Result type for model operations
pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Model '{0}' is not initialized: no database is connected")]
    NotInitialized(String),

    #[error("{operation} not acknowledged")]
    NotAcknowledged { operation: String },

    #[error("{operation} failed")]
    OperationFailed { operation: String },

    #[error("{operation} returned no document")]
    NullResult { operation: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Hook failed: {0}")]
    Hook(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Model '{0}' is not registered")]
    UnknownModel(String),
}

impl ModelError {
    pub fn not_acknowledged(operation: impl Into<String>) -> Self {
        Self::NotAcknowledged {
            operation: operation.into(),
        }
    }

    pub fn operation_failed(operation: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
        }
    }

    pub fn null_result(operation: impl Into<String>) -> Self {
        Self::NullResult {
            operation: operation.into(),
        }
    }

    /// Create a hook error
    pub fn hook(msg: impl Into<String>) -> Self {
        Self::Hook(msg.into())
    }

    /// Get error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized(_) => "MODEL_NOT_INITIALIZED",
            Self::NotAcknowledged { .. } => "MODEL_NOT_ACKNOWLEDGED",
            Self::OperationFailed { .. } => "MODEL_OPERATION_FAILED",
            Self::NullResult { .. } => "MODEL_NULL_RESULT",
            Self::Store(_) => "STORE_ERROR",
            Self::Hook(_) => "MODEL_HOOK_FAILED",
            Self::Serialization(_) => "MODEL_SERIALIZATION",
            Self::Schema(err) => err.code(),
            Self::UnknownModel(_) => "MODEL_UNKNOWN",
        }
    }

    /// The underlying store error, if any
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_time_budget_exceeded(&self) -> bool {
        self.store_error()
            .map_or(false, StoreError::is_time_budget_exceeded)
    }
}

impl From<bson::ser::Error> for ModelError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bson::de::Error> for ModelError {
    fn from(err: bson::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
