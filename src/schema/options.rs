//! Schema-wide options
//!
//! These travel alongside the compiled descriptor but are never part of the
//! validator tree submitted to the store.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bson::Document;
use serde::{Deserialize, Serialize};

/// Canonical creation timestamp property
pub const CREATED_AT: &str = "createdAt";
/// Canonical modification timestamp property
pub const UPDATED_AT: &str = "updatedAt";

/// Future produced by a defaults factory
pub type DefaultsFuture = Pin<Box<dyn Future<Output = Document> + Send>>;

type DefaultsFactory = Arc<dyn Fn() -> DefaultsFuture + Send + Sync>;

/// Default values merged under every inserted document.
///
/// A factory is invoked once for every document payload that needs
/// defaults, at the moment that payload is computed. Its result is never
/// cached.
#[derive(Clone, Default)]
pub enum Defaults {
    #[default]
    None,
    Static(Document),
    Factory(DefaultsFactory),
}

impl Defaults {
    /// Defaults computed by a synchronous function
    pub fn from_fn<F>(factory: F) -> Self
    where
        F: Fn() -> Document + Send + Sync + 'static,
    {
        Defaults::Factory(Arc::new(move || {
            let defaults = factory();
            Box::pin(async move { defaults })
        }))
    }

    /// Defaults computed by an asynchronous function
    pub fn from_async<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Document> + Send + 'static,
    {
        Defaults::Factory(Arc::new(move || Box::pin(factory())))
    }

    /// Produces the defaults for one document
    pub async fn resolve(&self) -> Document {
        match self {
            Defaults::None => Document::new(),
            Defaults::Static(defaults) => defaults.clone(),
            Defaults::Factory(factory) => factory().await,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Defaults::None)
    }
}

impl From<Document> for Defaults {
    fn from(defaults: Document) -> Self {
        Defaults::Static(defaults)
    }
}

impl fmt::Debug for Defaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Defaults::None => write!(f, "Defaults::None"),
            Defaults::Static(defaults) => f.debug_tuple("Defaults::Static").field(defaults).finish(),
            Defaults::Factory(_) => write!(f, "Defaults::Factory(..)"),
        }
    }
}

/// Timestamp configuration as declared
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Timestamps {
    #[default]
    Off,
    /// Canonical names `createdAt` / `updatedAt`
    On,
    /// Renamed properties; a missing name falls back to the canonical one
    Custom {
        created_at: Option<String>,
        updated_at: Option<String>,
    },
}

impl Timestamps {
    /// Rename only the creation timestamp
    pub fn created_at(name: impl Into<String>) -> Self {
        Timestamps::Custom {
            created_at: Some(name.into()),
            updated_at: None,
        }
    }

    /// Rename only the modification timestamp
    pub fn updated_at(name: impl Into<String>) -> Self {
        Timestamps::Custom {
            created_at: None,
            updated_at: Some(name.into()),
        }
    }

    /// Resolves property names, or `None` when timestamps are off.
    pub fn resolve(&self) -> Option<TimestampFields> {
        match self {
            Timestamps::Off => None,
            Timestamps::On => Some(TimestampFields::default()),
            Timestamps::Custom {
                created_at,
                updated_at,
            } => Some(TimestampFields {
                created_at: created_at.clone().unwrap_or_else(|| CREATED_AT.to_string()),
                updated_at: updated_at.clone().unwrap_or_else(|| UPDATED_AT.to_string()),
            }),
        }
    }
}

impl From<bool> for Timestamps {
    fn from(enabled: bool) -> Self {
        if enabled {
            Timestamps::On
        } else {
            Timestamps::Off
        }
    }
}

/// Resolved timestamp property names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampFields {
    pub created_at: String,
    pub updated_at: String,
}

impl Default for TimestampFields {
    fn default() -> Self {
        Self {
            created_at: CREATED_AT.to_string(),
            updated_at: UPDATED_AT.to_string(),
        }
    }
}

/// What the store does with a document that fails validation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationAction {
    #[default]
    Error,
    Warn,
}

impl ValidationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationAction::Error => "error",
            ValidationAction::Warn => "warn",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "error" => Some(ValidationAction::Error),
            "warn" => Some(ValidationAction::Warn),
            _ => None,
        }
    }
}

/// Which writes the store validates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    Off,
    Moderate,
    #[default]
    Strict,
}

impl ValidationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Off => "off",
            ValidationLevel::Moderate => "moderate",
            ValidationLevel::Strict => "strict",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(ValidationLevel::Off),
            "moderate" => Some(ValidationLevel::Moderate),
            "strict" => Some(ValidationLevel::Strict),
            _ => None,
        }
    }
}

/// Type of the `_id` property
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentifierKind {
    #[default]
    ObjectId,
    String,
    Number,
}

/// Options attached to a compiled schema
#[derive(Debug, Clone, Default)]
pub struct SchemaOptions {
    pub defaults: Defaults,
    pub timestamps: Timestamps,
    pub validation_action: ValidationAction,
    pub validation_level: ValidationLevel,
    pub identifier: IdentifierKind,
}

impl SchemaOptions {
    pub fn with_defaults(mut self, defaults: impl Into<Defaults>) -> Self {
        self.defaults = defaults.into();
        self
    }

    pub fn with_timestamps(mut self, timestamps: impl Into<Timestamps>) -> Self {
        self.timestamps = timestamps.into();
        self
    }

    pub fn with_validation_action(mut self, action: ValidationAction) -> Self {
        self.validation_action = action;
        self
    }

    pub fn with_validation_level(mut self, level: ValidationLevel) -> Self {
        self.validation_level = level;
        self
    }

    pub fn with_identifier(mut self, identifier: IdentifierKind) -> Self {
        self.identifier = identifier;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_timestamp_resolution() {
        assert_eq!(Timestamps::Off.resolve(), None);
        assert_eq!(Timestamps::On.resolve(), Some(TimestampFields::default()));

        let custom = Timestamps::created_at("_createdDate").resolve().unwrap();
        assert_eq!(custom.created_at, "_createdDate");
        assert_eq!(custom.updated_at, "updatedAt");

        let empty = Timestamps::Custom {
            created_at: None,
            updated_at: None,
        };
        assert_eq!(empty.resolve(), Some(TimestampFields::default()));
    }

    #[test]
    fn test_validation_defaults() {
        let options = SchemaOptions::default();
        assert_eq!(options.validation_action, ValidationAction::Error);
        assert_eq!(options.validation_level, ValidationLevel::Strict);
        assert_eq!(options.identifier, IdentifierKind::ObjectId);
        assert!(options.defaults.is_none());
    }

    #[test]
    fn test_validation_names_round_trip() {
        for level in [ValidationLevel::Off, ValidationLevel::Moderate, ValidationLevel::Strict] {
            assert_eq!(ValidationLevel::parse(level.as_str()), Some(level));
        }
        for action in [ValidationAction::Error, ValidationAction::Warn] {
            assert_eq!(ValidationAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(ValidationLevel::parse("lenient"), None);
    }

    #[tokio::test]
    async fn test_factory_runs_on_every_resolve() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let defaults = Defaults::from_fn(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) as i64;
            doc! { "sequence": n }
        });

        assert_eq!(defaults.resolve().await, doc! { "sequence": 0_i64 });
        assert_eq!(defaults.resolve().await, doc! { "sequence": 1_i64 });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_async_factory() {
        let defaults = Defaults::from_async(|| async { doc! { "status": "new" } });
        assert_eq!(defaults.resolve().await, doc! { "status": "new" });
        assert_eq!(Defaults::None.resolve().await, doc! {});
    }
}
