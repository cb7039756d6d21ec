//! Store call options
//!
//! [`OperationOptions`] is the options bag every collection call accepts.
//! Model-level defaults are overlaid with per-call options before the call
//! reaches the store.

use bson::Document;
use serde::{Deserialize, Serialize};

use crate::schema::{ValidationAction, ValidationLevel};

/// Which document `find_one_and_update` returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnDocument {
    #[default]
    Before,
    After,
}

/// Per-call options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperationOptions {
    /// Server-side time budget in milliseconds
    #[serde(rename = "maxTimeMS", skip_serializing_if = "Option::is_none")]
    pub max_time_ms: Option<u64>,

    /// Drop undefined values instead of storing them as null
    pub ignore_undefined: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub upsert: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<Document>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Document>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_document: Option<ReturnDocument>,

    /// Bulk writes stop at the first error when true (the default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordered: Option<bool>,
}

impl OperationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_time_ms(mut self, max_time_ms: u64) -> Self {
        self.max_time_ms = Some(max_time_ms);
        self
    }

    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert = Some(upsert);
        self
    }

    pub fn with_projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_return_document(mut self, return_document: ReturnDocument) -> Self {
        self.return_document = Some(return_document);
        self
    }

    pub fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = Some(ordered);
        self
    }

    /// Returns whether this call may insert when nothing matches
    pub fn is_upsert(&self) -> bool {
        self.upsert.unwrap_or(false)
    }

    /// Overlays `call` onto these options; every value set in `call` wins.
    pub fn overlay(self, call: OperationOptions) -> Self {
        Self {
            max_time_ms: call.max_time_ms.or(self.max_time_ms),
            ignore_undefined: self.ignore_undefined || call.ignore_undefined,
            upsert: call.upsert.or(self.upsert),
            projection: call.projection.or(self.projection),
            sort: call.sort.or(self.sort),
            limit: call.limit.or(self.limit),
            skip: call.skip.or(self.skip),
            return_document: call.return_document.or(self.return_document),
            ordered: call.ordered.or(self.ordered),
        }
    }
}

/// Options for creating a collection with a validator
#[derive(Debug, Clone, PartialEq)]
pub struct CreateCollectionOptions {
    pub validator: Document,
    pub validation_action: ValidationAction,
    pub validation_level: ValidationLevel,
}

/// Collection metadata as listed by the store
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    /// Validator currently installed, if any
    pub validator: Option<Document>,
    pub validation_action: ValidationAction,
    pub validation_level: ValidationLevel,
}

impl CollectionInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            validator: None,
            validation_action: ValidationAction::default(),
            validation_level: ValidationLevel::default(),
        }
    }
}
