//! Schema Sync Tests
//!
//! - An absent collection is created with the validator
//! - An existing collection has its validator modified
//! - The validator sent is the compiled tree, free of schema options
//! - Store failures surface unchanged

use bson::doc;
use docmodel::fields;
use docmodel::schema::field::*;
use docmodel::schema::{Schema, SchemaOptions, ValidationAction, ValidationLevel};
use docmodel::store::memory::MemoryDatabase;
use docmodel::store::StoreError;
use docmodel::{is_validator_current, sync_schema, SyncOutcome};

fn schema(level: ValidationLevel) -> Schema {
    Schema::compile(
        fields! {
            "sku" => string().required().pattern("^[A-Z]{3}-[0-9]+$"),
            "price" => number().minimum(0.0),
        },
        SchemaOptions::default()
            .with_defaults(doc! { "price": 0 })
            .with_timestamps(true)
            .with_validation_level(level),
    )
    .unwrap()
}

/// First sync creates the collection with the full validator payload.
#[tokio::test]
async fn test_sync_creates_collection() {
    let db = MemoryDatabase::default();
    let schema = schema(ValidationLevel::Strict);

    let outcome = sync_schema(&db, "products", &schema).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Created);

    let calls = db.calls_to("create");
    assert_eq!(calls.len(), 1);
    let payload = calls[0].arguments[1].as_document().unwrap();
    assert_eq!(
        payload.get_document("validator").unwrap(),
        &schema.descriptor().json_schema()
    );
    assert_eq!(payload.get_str("validationAction").unwrap(), "error");
    assert_eq!(payload.get_str("validationLevel").unwrap(), "strict");

    let rendered = payload.to_string();
    assert!(!rendered.contains("$defaults"));
    assert!(!rendered.contains("$timestamps"));
}

/// Later syncs modify the validator in place.
#[tokio::test]
async fn test_sync_modifies_existing_collection() {
    let db = MemoryDatabase::default();
    sync_schema(&db, "products", &schema(ValidationLevel::Strict))
        .await
        .unwrap();

    let relaxed = schema(ValidationLevel::Moderate);
    let outcome = sync_schema(&db, "products", &relaxed).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Modified);

    let calls = db.calls_to("collMod");
    let command = calls[0].arguments[0].as_document().unwrap();
    assert_eq!(command.get_str("collMod").unwrap(), "products");
    assert_eq!(command.get_str("validationLevel").unwrap(), "moderate");

    let info = db.collection_info("products").unwrap();
    assert_eq!(info.validation_level, ValidationLevel::Moderate);
    assert_eq!(info.validation_action, ValidationAction::Error);
    assert!(is_validator_current(&info, &relaxed));
}

/// Sync writes even when nothing changed; callers diff first to skip it.
#[tokio::test]
async fn test_sync_is_not_a_no_op() {
    let db = MemoryDatabase::default();
    let schema = schema(ValidationLevel::Strict);
    sync_schema(&db, "products", &schema).await.unwrap();

    let info = db.collection_info("products").unwrap();
    assert!(is_validator_current(&info, &schema));

    sync_schema(&db, "products", &schema).await.unwrap();
    assert_eq!(db.calls_to("collMod").len(), 1);
}

/// A failing listing aborts the sync with the store's error.
#[tokio::test]
async fn test_sync_surfaces_store_errors() {
    let db = MemoryDatabase::default();
    let failure = StoreError::bad_value("listing failed");
    db.fail_next(failure.clone());

    let err = sync_schema(&db, "products", &schema(ValidationLevel::Strict))
        .await
        .unwrap_err();
    assert_eq!(err, failure);
    assert!(db.collection_info("products").is_none());
}
