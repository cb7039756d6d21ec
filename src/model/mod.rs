//! Model binding and operation wrapper
//!
//! A [`Model`] pairs a compiled schema with a collection. Until a database
//! is bound every operation fails with [`ModelError::NotInitialized`], so
//! models can be declared before a connection exists.
//!
//! Each bound operation:
//! 1. creates a fresh [`MutationContext`]
//! 2. runs the "before" hooks in order; an error aborts the call
//! 3. shapes the payload through the [`MutationPolicy`] and calls the store
//!    with the model's default options overlaid by the call's options
//! 4. runs the "after" hooks with the result or the error
//!
//! A time-budget error from the store is rewritten to name the call,
//! e.g. `operation exceeded time limit in users.find({"a":1})`.

mod errors;
pub mod hooks;
mod registry;

use std::future::Future;
use std::sync::{Arc, OnceLock};

use bson::{doc, Bson, Document};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::mutation::{Clock, MutationPolicy, SystemClock};
use crate::schema::Schema;
use crate::store::{
    BulkWriteResult, Collection, Database, DeleteResult, OperationOptions, ReturnDocument,
    UpdateModifications, UpdateResult, WriteModel,
};

pub use errors::{ModelError, ModelResult};
pub use hooks::{
    hook_fn, AfterHook, BeforeHook, HookCall, HookFuture, ModelHooks, MutationContext, TraceHook,
};
pub use registry::ModelRegistry;

fn default_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Per-model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOptions {
    /// Time budget applied to every call unless the call sets its own
    #[serde(rename = "maxTimeMS", default, skip_serializing_if = "Option::is_none")]
    pub max_time_ms: Option<u64>,

    #[serde(skip)]
    pub hooks: ModelHooks,

    #[serde(skip, default = "default_clock")]
    pub clock: Arc<dyn Clock>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            max_time_ms: None,
            hooks: ModelHooks::default(),
            clock: default_clock(),
        }
    }
}

impl ModelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_time_ms(mut self, max_time_ms: u64) -> Self {
        self.max_time_ms = Some(max_time_ms);
        self
    }

    pub fn with_hooks(mut self, hooks: ModelHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_before_hook(mut self, hook: impl BeforeHook + 'static) -> Self {
        self.hooks.before.push(Arc::new(hook));
        self
    }

    pub fn with_after_hook(mut self, hook: impl AfterHook + 'static) -> Self {
        self.hooks.after.push(Arc::new(hook));
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Options every call starts from
    fn call_defaults(&self) -> OperationOptions {
        OperationOptions {
            max_time_ms: self.max_time_ms,
            ignore_undefined: true,
            ..OperationOptions::default()
        }
    }
}

/// A schema bound (or waiting to be bound) to a collection
pub struct Model {
    name: String,
    schema: Arc<Schema>,
    options: ModelOptions,
    policy: MutationPolicy,
    collection: OnceLock<Arc<dyn Collection>>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("bound", &self.is_bound())
            .field("options", &self.options)
            .finish()
    }
}

impl Model {
    /// Creates an unbound model over the collection `name`
    pub fn new(name: impl Into<String>, schema: Schema, options: ModelOptions) -> Self {
        let policy = MutationPolicy::new(&schema, Arc::clone(&options.clock));
        Self {
            name: name.into(),
            schema: Arc::new(schema),
            options,
            policy,
            collection: OnceLock::new(),
        }
    }

    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    pub fn policy(&self) -> &MutationPolicy {
        &self.policy
    }

    pub fn is_bound(&self) -> bool {
        self.collection.get().is_some()
    }

    /// Binds the model to a database. Binding twice is a no-op; returns
    /// whether this call performed the binding.
    pub fn bind(&self, database: &dyn Database) -> bool {
        if self.is_bound() {
            return false;
        }
        let bound = self.collection.set(database.collection(&self.name)).is_ok();
        if bound {
            debug!(model = %self.name, database = database.name(), "model bound");
        }
        bound
    }

    fn collection(&self) -> ModelResult<&Arc<dyn Collection>> {
        self.collection
            .get()
            .ok_or_else(|| ModelError::NotInitialized(self.name.clone()))
    }

    fn call_options(&self, options: OperationOptions) -> OperationOptions {
        let mut merged = self.options.call_defaults().overlay(options);
        merged.ignore_undefined = true;
        merged
    }

    /// Runs one operation inside the hook envelope
    async fn wrap<T, F>(&self, method: &'static str, arguments: Vec<Bson>, operation: F) -> ModelResult<T>
    where
        T: Serialize,
        F: Future<Output = ModelResult<T>>,
    {
        let hooks = &self.options.hooks;
        let mut context = MutationContext::new();

        for hook in &hooks.before {
            hook.before(HookCall {
                collection_name: &self.name,
                method_name: method,
                arguments: &arguments,
                context: &mut context,
                result: None,
                error: None,
            })
            .await?;
        }

        match operation.await {
            Ok(value) => {
                if !hooks.after.is_empty() {
                    let result = bson::to_bson(&value)?;
                    for hook in &hooks.after {
                        hook.after(HookCall {
                            collection_name: &self.name,
                            method_name: method,
                            arguments: &arguments,
                            context: &mut context,
                            result: Some(&result),
                            error: None,
                        })
                        .await?;
                    }
                }
                Ok(value)
            }
            Err(err) => {
                let err = self.describe_failure(method, &arguments, err);
                for hook in &hooks.after {
                    let outcome = hook
                        .after(HookCall {
                            collection_name: &self.name,
                            method_name: method,
                            arguments: &arguments,
                            context: &mut context,
                            result: None,
                            error: Some(&err),
                        })
                        .await;
                    if let Err(hook_err) = outcome {
                        warn!(
                            model = %self.name,
                            method,
                            error = %hook_err,
                            "after hook failed while reporting an error"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    /// Names the offending call in a time-budget error
    fn describe_failure(&self, method: &str, arguments: &[Bson], err: ModelError) -> ModelError {
        match err {
            ModelError::Store(store) if store.is_time_budget_exceeded() => {
                let message = format!(
                    "{} in {}",
                    store.message,
                    describe_call(&self.name, method, arguments)
                );
                ModelError::Store(store.with_message(message))
            }
            other => other,
        }
    }

    /// Inserts one document after merging defaults and timestamps.
    /// Returns the stored payload with its identifier.
    pub async fn insert_one(
        &self,
        document: Document,
        options: OperationOptions,
    ) -> ModelResult<Document> {
        let collection = self.collection()?;
        let arguments = call_arguments(vec![Bson::Document(document.clone())], &options);
        self.wrap("insert_one", arguments, async {
            let payload = self.policy.insert_document(document).await;
            let result = collection
                .insert_one(payload.clone(), self.call_options(options))
                .await?;
            if !result.acknowledged {
                return Err(ModelError::not_acknowledged("insert_one"));
            }
            Ok(with_id(payload, result.inserted_id))
        })
        .await
    }

    /// Inserts many documents. Returned payloads carry their identifiers
    /// in input order.
    pub async fn insert_many(
        &self,
        documents: Vec<Document>,
        options: OperationOptions,
    ) -> ModelResult<Vec<Document>> {
        let collection = self.collection()?;
        let arguments = call_arguments(
            vec![Bson::Array(documents.iter().cloned().map(Bson::Document).collect())],
            &options,
        );
        self.wrap("insert_many", arguments, async {
            let payloads = self.policy.insert_documents(documents).await;
            let expected = payloads.len() as u64;
            let result = collection
                .insert_many(payloads.clone(), self.call_options(options))
                .await?;
            if !result.acknowledged || result.inserted_count != expected {
                return Err(ModelError::not_acknowledged("insert_many"));
            }
            Ok(payloads
                .into_iter()
                .zip(result.inserted_ids)
                .map(|(payload, id)| with_id(payload, id))
                .collect())
        })
        .await
    }

    pub async fn find(
        &self,
        filter: Document,
        options: OperationOptions,
    ) -> ModelResult<Vec<Document>> {
        let collection = self.collection()?;
        let arguments = call_arguments(vec![Bson::Document(filter.clone())], &options);
        self.wrap("find", arguments, async {
            Ok(collection.find(filter, self.call_options(options)).await?)
        })
        .await
    }

    pub async fn find_one(
        &self,
        filter: Document,
        options: OperationOptions,
    ) -> ModelResult<Option<Document>> {
        let collection = self.collection()?;
        let arguments = call_arguments(vec![Bson::Document(filter.clone())], &options);
        self.wrap("find_one", arguments, async {
            Ok(collection.find_one(filter, self.call_options(options)).await?)
        })
        .await
    }

    pub async fn find_by_id(
        &self,
        id: impl Into<Bson>,
        options: OperationOptions,
    ) -> ModelResult<Option<Document>> {
        let collection = self.collection()?;
        let id = id.into();
        let arguments = call_arguments(vec![id.clone()], &options);
        self.wrap("find_by_id", arguments, async {
            Ok(collection
                .find_one(doc! { "_id": id }, self.call_options(options))
                .await?)
        })
        .await
    }

    /// `find` deserialized into `T`; a projection narrows what `T` may require.
    pub async fn find_as<T: DeserializeOwned>(
        &self,
        filter: Document,
        options: OperationOptions,
    ) -> ModelResult<Vec<T>> {
        self.find(filter, options)
            .await?
            .into_iter()
            .map(|doc| bson::from_document(doc).map_err(ModelError::from))
            .collect()
    }

    pub async fn find_one_as<T: DeserializeOwned>(
        &self,
        filter: Document,
        options: OperationOptions,
    ) -> ModelResult<Option<T>> {
        match self.find_one(filter, options).await? {
            Some(doc) => Ok(Some(bson::from_document(doc)?)),
            None => Ok(None),
        }
    }

    pub async fn find_by_id_as<T: DeserializeOwned>(
        &self,
        id: impl Into<Bson>,
        options: OperationOptions,
    ) -> ModelResult<Option<T>> {
        match self.find_by_id(id, options).await? {
            Some(doc) => Ok(Some(bson::from_document(doc)?)),
            None => Ok(None),
        }
    }

    /// Whether any document matches `filter`
    pub async fn exists(&self, filter: Document) -> ModelResult<bool> {
        let options = OperationOptions::new().with_projection(doc! { "_id": 1 });
        Ok(self.find_one(filter, options).await?.is_some())
    }

    /// Updates one document and returns it (before or after, per
    /// `return_document`). Fails when the store reports no success.
    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
        options: OperationOptions,
    ) -> ModelResult<Option<Document>> {
        let collection = self.collection()?;
        let update = update.into();
        let arguments = call_arguments(
            vec![Bson::Document(filter.clone()), Bson::from(update.clone())],
            &options,
        );
        self.wrap("find_one_and_update", arguments, async {
            let update = self.policy.update(update, options.is_upsert()).await;
            let result = collection
                .find_one_and_update(filter, update, self.call_options(options))
                .await?;
            if !result.ok {
                return Err(ModelError::operation_failed("find_one_and_update"));
            }
            Ok(result.value)
        })
        .await
    }

    pub async fn find_one_and_delete(
        &self,
        filter: Document,
        options: OperationOptions,
    ) -> ModelResult<Option<Document>> {
        let collection = self.collection()?;
        let arguments = call_arguments(vec![Bson::Document(filter.clone())], &options);
        self.wrap("find_one_and_delete", arguments, async {
            let result = collection
                .find_one_and_delete(filter, self.call_options(options))
                .await?;
            if !result.ok {
                return Err(ModelError::operation_failed("find_one_and_delete"));
            }
            Ok(result.value)
        })
        .await
    }

    /// `find_one_and_update` with upsert forced on, returning the document
    /// after the write. The caller's `return_document` is ignored. Hooks run
    /// once, for the inner call.
    pub async fn upsert(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
        options: OperationOptions,
    ) -> ModelResult<Document> {
        let options = options
            .with_return_document(ReturnDocument::After)
            .with_upsert(true);
        self.find_one_and_update(filter, update, options)
            .await?
            .ok_or_else(|| ModelError::null_result("upsert"))
    }

    pub async fn update_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
        options: OperationOptions,
    ) -> ModelResult<UpdateResult> {
        let collection = self.collection()?;
        let update = update.into();
        let arguments = call_arguments(
            vec![Bson::Document(filter.clone()), Bson::from(update.clone())],
            &options,
        );
        self.wrap("update_one", arguments, async {
            let update = self.policy.update(update, options.is_upsert()).await;
            Ok(collection
                .update_one(filter, update, self.call_options(options))
                .await?)
        })
        .await
    }

    pub async fn update_many(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
        options: OperationOptions,
    ) -> ModelResult<UpdateResult> {
        let collection = self.collection()?;
        let update = update.into();
        let arguments = call_arguments(
            vec![Bson::Document(filter.clone()), Bson::from(update.clone())],
            &options,
        );
        self.wrap("update_many", arguments, async {
            let update = self.policy.update(update, options.is_upsert()).await;
            Ok(collection
                .update_many(filter, update, self.call_options(options))
                .await?)
        })
        .await
    }

    pub async fn delete_one(
        &self,
        filter: Document,
        options: OperationOptions,
    ) -> ModelResult<DeleteResult> {
        let collection = self.collection()?;
        let arguments = call_arguments(vec![Bson::Document(filter.clone())], &options);
        self.wrap("delete_one", arguments, async {
            Ok(collection
                .delete_one(filter, self.call_options(options))
                .await?)
        })
        .await
    }

    pub async fn delete_many(
        &self,
        filter: Document,
        options: OperationOptions,
    ) -> ModelResult<DeleteResult> {
        let collection = self.collection()?;
        let arguments = call_arguments(vec![Bson::Document(filter.clone())], &options);
        self.wrap("delete_many", arguments, async {
            Ok(collection
                .delete_many(filter, self.call_options(options))
                .await?)
        })
        .await
    }

    /// Normalizes and runs a bulk write. An empty list returns `None`
    /// without calling the store.
    pub async fn bulk_write(
        &self,
        operations: Vec<WriteModel>,
        options: OperationOptions,
    ) -> ModelResult<Option<BulkWriteResult>> {
        let collection = self.collection()?;
        let arguments = call_arguments(
            vec![Bson::Array(
                operations
                    .iter()
                    .map(|op| Bson::Document(op.to_document()))
                    .collect(),
            )],
            &options,
        );
        self.wrap("bulk_write", arguments, async {
            if operations.is_empty() {
                return Ok(None);
            }
            let operations = self.policy.bulk_write(operations).await;
            Ok(Some(
                collection
                    .bulk_write(operations, self.call_options(options))
                    .await?,
            ))
        })
        .await
    }

    pub async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: OperationOptions,
    ) -> ModelResult<Vec<Document>> {
        let collection = self.collection()?;
        let arguments = call_arguments(
            vec![Bson::Array(pipeline.iter().cloned().map(Bson::Document).collect())],
            &options,
        );
        self.wrap("aggregate", arguments, async {
            Ok(collection
                .aggregate(pipeline, self.call_options(options))
                .await?)
        })
        .await
    }

    /// `aggregate` deserialized into a caller-chosen shape
    pub async fn aggregate_as<T: DeserializeOwned>(
        &self,
        pipeline: Vec<Document>,
        options: OperationOptions,
    ) -> ModelResult<Vec<T>> {
        self.aggregate(pipeline, options)
            .await?
            .into_iter()
            .map(|doc| bson::from_document(doc).map_err(ModelError::from))
            .collect()
    }

    pub async fn distinct(
        &self,
        key: &str,
        filter: Document,
        options: OperationOptions,
    ) -> ModelResult<Vec<Bson>> {
        let collection = self.collection()?;
        let arguments = call_arguments(
            vec![Bson::from(key), Bson::Document(filter.clone())],
            &options,
        );
        self.wrap("distinct", arguments, async {
            Ok(collection
                .distinct(key.to_string(), filter, self.call_options(options))
                .await?)
        })
        .await
    }

    pub async fn count_documents(
        &self,
        filter: Document,
        options: OperationOptions,
    ) -> ModelResult<u64> {
        let collection = self.collection()?;
        let arguments = call_arguments(vec![Bson::Document(filter.clone())], &options);
        self.wrap("count_documents", arguments, async {
            Ok(collection
                .count_documents(filter, self.call_options(options))
                .await?)
        })
        .await
    }

    pub async fn estimated_document_count(&self, options: OperationOptions) -> ModelResult<u64> {
        let collection = self.collection()?;
        let arguments = call_arguments(Vec::new(), &options);
        self.wrap("estimated_document_count", arguments, async {
            Ok(collection
                .estimated_document_count(self.call_options(options))
                .await?)
        })
        .await
    }
}

/// Hook arguments: the call's values, plus its options when any are set
fn call_arguments(mut values: Vec<Bson>, options: &OperationOptions) -> Vec<Bson> {
    if *options != OperationOptions::default() {
        match bson::to_bson(options) {
            Ok(options) => values.push(options),
            Err(err) => debug!(error = %err, "options left out of hook arguments"),
        }
    }
    values
}

/// `collection.method(arg, ...)` with arguments as relaxed extended JSON
fn describe_call(collection: &str, method: &str, arguments: &[Bson]) -> String {
    let arguments: Vec<String> = arguments
        .iter()
        .map(|argument| argument.clone().into_relaxed_extjson().to_string())
        .collect();
    format!("{}.{}({})", collection, method, arguments.join(", "))
}

/// Puts the store-assigned identifier first when the payload had none
fn with_id(payload: Document, id: Bson) -> Document {
    if payload.contains_key("_id") {
        return payload;
    }
    let mut identified = doc! { "_id": id };
    identified.extend(payload);
    identified
}
