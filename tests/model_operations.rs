//! Model Operation Tests
//!
//! The operation wrapper end to end over the in-memory store:
//! - Calls before binding fail without touching the store
//! - Hooks run around every call and share one context per call
//! - Store outcomes map onto model errors
//! - Time-budget errors name the offending call

use std::sync::{Arc, Mutex};

use bson::{doc, Bson};
use docmodel::fields;
use docmodel::model::{
    hook_fn, HookCall, Model, ModelError, ModelHooks, ModelOptions, ModelRegistry, TraceHook,
};
use docmodel::mutation::FixedClock;
use docmodel::schema::field::*;
use docmodel::schema::{Schema, SchemaOptions};
use docmodel::store::memory::MemoryDatabase;
use docmodel::store::{OperationOptions, ReturnDocument, StoreError, WriteModel};
use docmodel::sync_schema;
use serde::Deserialize;

// =============================================================================
// Helper Functions
// =============================================================================

fn schema() -> Schema {
    Schema::compile(
        fields! {
            "name" => string().required(),
            "age" => number(),
            "team" => string(),
        },
        SchemaOptions::default(),
    )
    .unwrap()
}

fn bound_with(options: ModelOptions) -> (MemoryDatabase, Model) {
    let db = MemoryDatabase::default();
    let model = Model::new("users", schema(), options.with_clock(FixedClock::at_millis(0)));
    model.bind(&db);
    (db, model)
}

fn bound() -> (MemoryDatabase, Model) {
    bound_with(ModelOptions::default())
}

async fn seed(model: &Model) {
    model
        .insert_many(
            vec![
                doc! { "name": "ana", "age": 31, "team": "red" },
                doc! { "name": "bo", "age": 25, "team": "blue" },
                doc! { "name": "cy", "age": 40, "team": "red" },
            ],
            OperationOptions::default(),
        )
        .await
        .unwrap();
}

type Log = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    name: String,
    age: Option<i32>,
}

// =============================================================================
// Binding Tests
// =============================================================================

/// Every verb fails before binding, and no hook runs.
#[tokio::test]
async fn test_unbound_model_not_initialized() {
    let log: Log = Arc::default();
    let seen = Arc::clone(&log);
    let model = Model::new(
        "users",
        schema(),
        ModelOptions::new().with_before_hook(hook_fn(move |call: HookCall<'_>| {
            seen.lock().unwrap().push(call.method_name.to_string());
            Ok(())
        })),
    );

    let err = model
        .insert_one(doc! { "name": "ana" }, OperationOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "MODEL_NOT_INITIALIZED");
    assert!(model.count_documents(doc! {}, OperationOptions::default()).await.is_err());
    assert!(model.bulk_write(Vec::new(), OperationOptions::default()).await.is_err());
    assert!(log.lock().unwrap().is_empty());
}

/// A registry binds models registered before and after connecting.
#[tokio::test]
async fn test_registry_end_to_end() {
    let db = MemoryDatabase::default();
    let registry = ModelRegistry::new();
    let users = registry.register("users", schema(), ModelOptions::default());
    registry.connect(Arc::new(db.clone()));
    registry.update_schemas().await.unwrap();

    users
        .insert_one(doc! { "name": "ana" }, OperationOptions::default())
        .await
        .unwrap();
    let err = users
        .insert_one(doc! { "age": 3 }, OperationOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.store_error().map(|e| e.code), Some(121));

    let same = registry.model("users").unwrap();
    assert!(Arc::ptr_eq(&users, &same));
}

// =============================================================================
// CRUD Tests
// =============================================================================

/// Reads see what writes stored.
#[tokio::test]
async fn test_reads() {
    let (_db, model) = bound();
    seed(&model).await;

    let reds = model
        .find(
            doc! { "team": "red" },
            OperationOptions::new().with_sort(doc! { "age": -1 }),
        )
        .await
        .unwrap();
    let names: Vec<&str> = reds.iter().map(|d| d.get_str("name").unwrap()).collect();
    assert_eq!(names, vec!["cy", "ana"]);

    let bo = model
        .find_one(doc! { "name": "bo" }, OperationOptions::default())
        .await
        .unwrap()
        .unwrap();
    let by_id = model
        .find_by_id(bo.get("_id").cloned().unwrap(), OperationOptions::default())
        .await
        .unwrap();
    assert_eq!(by_id, Some(bo));

    assert!(model.exists(doc! { "age": { "$gt": 35 } }).await.unwrap());
    assert!(!model.exists(doc! { "age": { "$gt": 50 } }).await.unwrap());

    assert_eq!(
        model.count_documents(doc! { "team": "red" }, OperationOptions::default()).await.unwrap(),
        2
    );
    assert_eq!(
        model.estimated_document_count(OperationOptions::default()).await.unwrap(),
        3
    );

    let mut teams = model
        .distinct("team", doc! {}, OperationOptions::default())
        .await
        .unwrap();
    teams.sort_by_key(|t| t.as_str().map(str::to_string));
    assert_eq!(teams, vec![Bson::from("blue"), Bson::from("red")]);
}

/// Typed reads deserialize into caller structs.
#[tokio::test]
async fn test_typed_reads() {
    let (_db, model) = bound();
    seed(&model).await;
    model
        .insert_one(doc! { "name": "di" }, OperationOptions::default())
        .await
        .unwrap();

    let di: Option<User> = model
        .find_one_as(doc! { "name": "di" }, OperationOptions::default())
        .await
        .unwrap();
    assert_eq!(di, Some(User { name: "di".into(), age: None }));

    let young: Vec<User> = model
        .find_as(doc! { "age": { "$lt": 30 } }, OperationOptions::default())
        .await
        .unwrap();
    assert_eq!(young, vec![User { name: "bo".into(), age: Some(25) }]);
}

/// Updates, find-and-modify and deletes report what changed.
#[tokio::test]
async fn test_writes() {
    let (db, model) = bound();
    seed(&model).await;

    let result = model
        .update_many(
            doc! { "team": "red" },
            doc! { "$inc": { "age": 1 } },
            OperationOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(result.matched_count, 2);
    assert_eq!(result.modified_count, 2);

    let after = model
        .find_one_and_update(
            doc! { "name": "bo" },
            doc! { "$set": { "team": "red" } },
            OperationOptions::new().with_return_document(ReturnDocument::After),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.get_str("team").unwrap(), "red");

    let upserted = model
        .upsert(
            doc! { "name": "ed" },
            doc! { "$set": { "age": 50 } },
            OperationOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(upserted.get_str("name").unwrap(), "ed");
    assert_eq!(upserted.get_i32("age").unwrap(), 50);

    let deleted = model
        .find_one_and_delete(doc! { "name": "ed" }, OperationOptions::default())
        .await
        .unwrap();
    assert!(deleted.is_some());

    let result = model
        .delete_many(doc! { "team": "red" }, OperationOptions::default())
        .await
        .unwrap();
    assert_eq!(result.deleted_count, 3);
    assert_eq!(db.documents("users").len(), 0);
}

/// Upsert always returns the written document, whatever `return_document` says.
#[tokio::test]
async fn test_upsert_returns_inserted_document() {
    let (db, model) = bound();
    let inserted = model
        .upsert(
            doc! { "name": "fay" },
            doc! { "$set": { "age": 20 } },
            OperationOptions::new().with_return_document(ReturnDocument::Before),
        )
        .await
        .unwrap();
    assert_eq!(inserted.get_str("name").unwrap(), "fay");
    assert_eq!(inserted.get_i32("age").unwrap(), 20);
    assert_eq!(
        db.calls_to("findOneAndUpdate")[0].options.return_document,
        Some(ReturnDocument::After)
    );
}

/// Bulk writes and aggregation go through unchanged counts.
#[tokio::test]
async fn test_bulk_and_aggregate() {
    let (_db, model) = bound();
    let result = model
        .bulk_write(
            vec![
                WriteModel::insert_one(doc! { "name": "ana", "team": "red" }),
                WriteModel::insert_one(doc! { "name": "bo", "team": "blue" }),
                WriteModel::update_one(doc! { "name": "bo" }, doc! { "$set": { "age": 3 } }),
                WriteModel::delete_one(doc! { "name": "ana" }),
            ],
            OperationOptions::default(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.inserted_count, 2);
    assert_eq!(result.modified_count, 1);
    assert_eq!(result.deleted_count, 1);

    let counted = model
        .aggregate(
            vec![doc! { "$match": { "team": "blue" } }, doc! { "$count": "n" }],
            OperationOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(counted, vec![doc! { "n": 1_i64 }]);
}

// =============================================================================
// Store Outcome Tests
// =============================================================================

/// Unacknowledged writes are errors naming the operation.
#[tokio::test]
async fn test_not_acknowledged() {
    let (db, model) = bound();
    db.set_acknowledged(false);
    let err = model
        .insert_one(doc! { "name": "ana" }, OperationOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, ModelError::not_acknowledged("insert_one"));

    let err = model
        .insert_many(vec![doc! { "name": "bo" }], OperationOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "MODEL_NOT_ACKNOWLEDGED");
}

/// A find-and-modify reply without success is an error.
#[tokio::test]
async fn test_find_and_modify_not_ok() {
    let (db, model) = bound();
    db.set_find_and_modify_ok(false);
    let err = model
        .find_one_and_update(
            doc! { "name": "ana" },
            doc! { "$set": { "age": 1 } },
            OperationOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err, ModelError::operation_failed("find_one_and_update"));
}

/// Time-budget errors name the collection, method and arguments.
#[tokio::test]
async fn test_time_budget_message() {
    let (db, model) = bound_with(ModelOptions::new().with_max_time_ms(5));
    db.fail_next(StoreError::time_budget_exceeded());

    let err = model
        .find(doc! { "a": 1 }, OperationOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_time_budget_exceeded());
    assert_eq!(
        err.to_string(),
        r#"operation exceeded time limit in users.find({"a":1})"#
    );
    assert_eq!(db.calls_to("find")[0].options.max_time_ms, Some(5));
}

/// Other store errors pass through untouched.
#[tokio::test]
async fn test_store_errors_pass_through() {
    let (db, model) = bound();
    let original = StoreError::bad_value("boom");
    db.fail_next(original.clone());
    let err = model
        .delete_one(doc! {}, OperationOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, ModelError::Store(original));
}

// =============================================================================
// Hook Tests
// =============================================================================

/// Before and after hooks of one call share the same context.
#[tokio::test]
async fn test_hooks_share_context() {
    let log: Log = Arc::default();
    let seen = Arc::clone(&log);
    let hooks = ModelHooks::new()
        .with_before(hook_fn(|call: HookCall<'_>| {
            call.context.insert("marker", call.method_name);
            Ok(())
        }))
        .with_after(hook_fn(move |call: HookCall<'_>| {
            let marker = call.context.get_str("marker").unwrap_or("missing");
            let outcome = if call.is_error() { "error" } else { "ok" };
            seen.lock()
                .unwrap()
                .push(format!("{}:{}:{}", call.collection_name, marker, outcome));
            Ok(())
        }));
    let (db, model) = bound_with(ModelOptions::new().with_hooks(hooks));

    model.find(doc! {}, OperationOptions::default()).await.unwrap();
    db.fail_next(StoreError::bad_value("boom"));
    let _ = model.count_documents(doc! {}, OperationOptions::default()).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec!["users:find:ok".to_string(), "users:count_documents:error".to_string()]
    );
}

/// Hooks see the caller's arguments and the serialized result.
#[tokio::test]
async fn test_hook_envelope() {
    let log: Log = Arc::default();
    let seen = Arc::clone(&log);
    let (_db, model) = bound_with(ModelOptions::new().with_after_hook(hook_fn(
        move |call: HookCall<'_>| {
            seen.lock().unwrap().push(format!(
                "{} {:?} {:?}",
                call.method_name,
                call.arguments,
                call.result.is_some()
            ));
            Ok(())
        },
    )));

    model
        .count_documents(doc! { "a": 1 }, OperationOptions::default())
        .await
        .unwrap();
    let entries = log.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].starts_with("count_documents"));
    assert!(entries[0].ends_with("true"));
}

/// A failing before hook stops the call before the store.
#[tokio::test]
async fn test_before_hook_aborts() {
    let (db, model) = bound_with(ModelOptions::new().with_before_hook(hook_fn(
        |_call: HookCall<'_>| Err(ModelError::hook("denied")),
    )));
    let err = model
        .insert_one(doc! { "name": "ana" }, OperationOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, ModelError::hook("denied"));
    assert!(db.calls().is_empty());
}

/// After-hook failures surface on success and are swallowed on error.
#[tokio::test]
async fn test_after_hook_failures() {
    let (db, model) = bound_with(ModelOptions::new().with_after_hook(hook_fn(
        |_call: HookCall<'_>| Err(ModelError::hook("after")),
    )));

    let err = model.find(doc! {}, OperationOptions::default()).await.unwrap_err();
    assert_eq!(err, ModelError::hook("after"));

    let original = StoreError::bad_value("boom");
    db.fail_next(original.clone());
    let err = model.find(doc! {}, OperationOptions::default()).await.unwrap_err();
    assert_eq!(err, ModelError::Store(original));
}

/// The built-in trace hook leaves the call result alone.
#[tokio::test]
async fn test_trace_hook() {
    let (_db, model) =
        bound_with(ModelOptions::new().with_hooks(ModelHooks::new().with_both(TraceHook)));
    let stored = model
        .insert_one(doc! { "name": "ana" }, OperationOptions::default())
        .await
        .unwrap();
    assert_eq!(stored.get_str("name").unwrap(), "ana");
}

/// Validators installed by sync apply to model writes.
#[tokio::test]
async fn test_model_writes_checked_by_synced_validator() {
    let (db, model) = bound();
    sync_schema(&db, model.name(), model.schema()).await.unwrap();

    model
        .insert_one(doc! { "name": "ana", "age": 3 }, OperationOptions::default())
        .await
        .unwrap();
    let err = model
        .insert_one(doc! { "name": 7 }, OperationOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "STORE_ERROR");
}
