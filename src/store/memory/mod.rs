//! In-memory document store
//!
//! A [`Database`] kept entirely in process memory. Collections are created
//! implicitly on first write, installed validators are enforced, and every
//! call is recorded so tests can inspect exactly what reached the store.
//!
//! Failures can be injected with [`MemoryDatabase::fail_next`], and writes
//! can be made to report non-acknowledgement with
//! [`MemoryDatabase::set_acknowledged`].

mod eval;

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bson::oid::ObjectId;
use bson::{doc, Bson, DateTime, Document};
use tracing::{debug, warn};

use super::{
    BulkWriteResult, Collection, CollectionInfo, CreateCollectionOptions, Database, DeleteResult,
    FindAndModifyResult, InsertManyResult, InsertOneResult, OperationOptions, ReturnDocument,
    StoreError, StoreFuture, StoreResult, UpdateModifications, UpdateResult, WriteModel,
};
use crate::schema::{parse_validator, validate_value, FieldDescriptor};
use crate::schema::{ValidationAction, ValidationLevel};

/// One call as the store received it
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub collection: String,
    /// Store-side name, e.g. `insertOne` or `collMod`
    pub method: String,
    pub arguments: Vec<Bson>,
    pub options: OperationOptions,
}

#[derive(Debug)]
struct CollectionState {
    documents: Vec<Document>,
    validator: Option<Document>,
    descriptor: Option<FieldDescriptor>,
    validation_action: ValidationAction,
    validation_level: ValidationLevel,
}

impl Default for CollectionState {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
            validator: None,
            descriptor: None,
            validation_action: ValidationAction::default(),
            validation_level: ValidationLevel::default(),
        }
    }
}

impl CollectionState {
    fn install_validator(&mut self, validator: Document) {
        self.descriptor = match parse_validator(&validator) {
            Ok(descriptor) => Some(descriptor),
            Err(err) => {
                debug!(error = %err, "validator not enforced in memory");
                None
            }
        };
        self.validator = Some(validator);
    }

    fn check(&self, collection: &str, doc: &Document, previous: Option<&Document>) -> StoreResult<()> {
        let descriptor = match &self.descriptor {
            Some(descriptor) => descriptor,
            None => return Ok(()),
        };
        match self.validation_level {
            ValidationLevel::Off => return Ok(()),
            ValidationLevel::Moderate => {
                if let Some(previous) = previous {
                    let was_valid =
                        validate_value(descriptor, &Bson::Document(previous.clone()), "").is_ok();
                    if !was_valid {
                        return Ok(());
                    }
                }
            }
            ValidationLevel::Strict => {}
        }
        match validate_value(descriptor, &Bson::Document(doc.clone()), "") {
            Ok(()) => Ok(()),
            Err(err) if self.validation_action == ValidationAction::Warn => {
                warn!(collection, error = %err, "document failed validation");
                Ok(())
            }
            Err(err) => Err(StoreError::validation_failed(err)),
        }
    }

    fn info(&self, name: &str) -> CollectionInfo {
        CollectionInfo {
            name: name.to_string(),
            validator: self.validator.clone(),
            validation_action: self.validation_action,
            validation_level: self.validation_level,
        }
    }
}

#[derive(Debug)]
struct DatabaseState {
    collections: BTreeMap<String, CollectionState>,
    calls: Vec<RecordedCall>,
    pending_failures: VecDeque<StoreError>,
    acknowledged: bool,
    find_and_modify_ok: bool,
}

impl Default for DatabaseState {
    fn default() -> Self {
        Self {
            collections: BTreeMap::new(),
            calls: Vec::new(),
            pending_failures: VecDeque::new(),
            acknowledged: true,
            find_and_modify_ok: true,
        }
    }
}

impl DatabaseState {
    fn record(
        &mut self,
        collection: &str,
        method: &str,
        arguments: Vec<Bson>,
        options: &OperationOptions,
    ) -> StoreResult<()> {
        self.calls.push(RecordedCall {
            collection: collection.to_string(),
            method: method.to_string(),
            arguments,
            options: options.clone(),
        });
        match self.pending_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn documents(&self, collection: &str) -> &[Document] {
        self.collections
            .get(collection)
            .map(|c| c.documents.as_slice())
            .unwrap_or(&[])
    }

    fn collection_mut(&mut self, collection: &str) -> &mut CollectionState {
        self.collections.entry(collection.to_string()).or_default()
    }

    fn select(
        &self,
        collection: &str,
        filter: &Document,
        options: &OperationOptions,
    ) -> StoreResult<Vec<Document>> {
        let mut found = Vec::new();
        for doc in self.documents(collection) {
            if eval::matches(doc, filter)? {
                found.push(doc.clone());
            }
        }
        if let Some(sort) = &options.sort {
            eval::sort_documents(&mut found, sort);
        }
        let skip = options.skip.unwrap_or(0) as usize;
        let limit = match options.limit {
            Some(limit) if limit != 0 => limit.unsigned_abs() as usize,
            _ => usize::MAX,
        };
        let found = found.into_iter().skip(skip).take(limit);
        Ok(match &options.projection {
            Some(projection) => found.map(|doc| eval::project(&doc, projection)).collect(),
            None => found.collect(),
        })
    }

    /// Position of the first document matching `filter`, honouring `sort`
    fn position(
        &self,
        collection: &str,
        filter: &Document,
        options: &OperationOptions,
    ) -> StoreResult<Option<usize>> {
        let docs = self.documents(collection);
        let mut candidates = Vec::new();
        for (index, doc) in docs.iter().enumerate() {
            if eval::matches(doc, filter)? {
                candidates.push(index);
            }
        }
        if let Some(sort) = &options.sort {
            let mut ordered: Vec<Document> = candidates.iter().map(|&i| docs[i].clone()).collect();
            eval::sort_documents(&mut ordered, sort);
            return Ok(ordered.first().and_then(|first| {
                candidates.iter().copied().find(|&i| &docs[i] == first)
            }));
        }
        Ok(candidates.first().copied())
    }

    fn insert(&mut self, collection: &str, doc: Document) -> StoreResult<Bson> {
        let (id, doc) = match doc.get("_id") {
            Some(id) => (id.clone(), doc),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                let mut with_id = doc! { "_id": id.clone() };
                with_id.extend(doc);
                (id, with_id)
            }
        };
        let state = self.collection_mut(collection);
        if state.documents.iter().any(|d| d.get("_id") == Some(&id)) {
            return Err(StoreError::duplicate_key(collection, &id));
        }
        state.check(collection, &doc, None)?;
        state.documents.push(doc);
        Ok(id)
    }

    fn update(
        &mut self,
        collection: &str,
        filter: &Document,
        update: &UpdateModifications,
        upsert: bool,
        multi: bool,
    ) -> StoreResult<UpdateResult> {
        eval::check_update_paths(update)?;
        let now = DateTime::now();

        let mut positions = Vec::new();
        for (index, doc) in self.documents(collection).iter().enumerate() {
            if eval::matches(doc, filter)? {
                positions.push(index);
                if !multi {
                    break;
                }
            }
        }

        let mut modified = 0;
        if !positions.is_empty() {
            let state = self.collection_mut(collection);
            for &index in &positions {
                let previous = &state.documents[index];
                let mut updated = previous.clone();
                eval::apply_update(&mut updated, update, false, now)?;
                if &updated == previous {
                    continue;
                }
                state.check(collection, &updated, Some(previous))?;
                state.documents[index] = updated;
                modified += 1;
            }
        }

        let mut upserted_id = None;
        if positions.is_empty() && upsert {
            let mut doc = eval::seed_from_filter(filter)?;
            eval::apply_update(&mut doc, update, true, now)?;
            upserted_id = Some(self.insert(collection, doc)?);
        }

        Ok(UpdateResult {
            acknowledged: self.acknowledged,
            matched_count: positions.len() as u64,
            modified_count: modified,
            upserted_count: u64::from(upserted_id.is_some()),
            upserted_id,
        })
    }

    fn replace(
        &mut self,
        collection: &str,
        filter: &Document,
        replacement: Document,
        upsert: bool,
    ) -> StoreResult<UpdateResult> {
        if replacement.keys().any(|k| k.starts_with('$')) {
            return Err(StoreError::bad_value(
                "Replacement document must not contain atomic operators",
            ));
        }
        match self.position(collection, filter, &OperationOptions::default())? {
            Some(index) => {
                let state = self.collection_mut(collection);
                let previous = &state.documents[index];
                let mut replaced = Document::new();
                if let Some(id) = previous.get("_id") {
                    replaced.insert("_id", id.clone());
                }
                replaced.extend(replacement.into_iter().filter(|(k, _)| k != "_id"));
                state.check(collection, &replaced, Some(previous))?;
                let modified = u64::from(state.documents[index] != replaced);
                state.documents[index] = replaced;
                Ok(UpdateResult {
                    acknowledged: self.acknowledged,
                    matched_count: 1,
                    modified_count: modified,
                    upserted_count: 0,
                    upserted_id: None,
                })
            }
            None if upsert => {
                let mut doc = eval::seed_from_filter(filter)?;
                doc.extend(replacement);
                let id = self.insert(collection, doc)?;
                Ok(UpdateResult {
                    acknowledged: self.acknowledged,
                    matched_count: 0,
                    modified_count: 0,
                    upserted_count: 1,
                    upserted_id: Some(id),
                })
            }
            None => Ok(UpdateResult {
                acknowledged: self.acknowledged,
                matched_count: 0,
                modified_count: 0,
                upserted_count: 0,
                upserted_id: None,
            }),
        }
    }

    fn delete(&mut self, collection: &str, filter: &Document, multi: bool) -> StoreResult<DeleteResult> {
        let mut doomed = Vec::new();
        for (index, doc) in self.documents(collection).iter().enumerate() {
            if eval::matches(doc, filter)? {
                doomed.push(index);
                if !multi {
                    break;
                }
            }
        }
        if let Some(state) = self.collections.get_mut(collection) {
            for index in doomed.iter().rev() {
                state.documents.remove(*index);
            }
        }
        Ok(DeleteResult {
            acknowledged: self.acknowledged,
            deleted_count: doomed.len() as u64,
        })
    }

    fn find_one_and_update(
        &mut self,
        collection: &str,
        filter: &Document,
        update: &UpdateModifications,
        options: &OperationOptions,
    ) -> StoreResult<FindAndModifyResult> {
        eval::check_update_paths(update)?;
        let now = DateTime::now();
        let after = options.return_document == Some(ReturnDocument::After);

        let value = match self.position(collection, filter, options)? {
            Some(index) => {
                let state = self.collection_mut(collection);
                let previous = state.documents[index].clone();
                let mut updated = previous.clone();
                eval::apply_update(&mut updated, update, false, now)?;
                state.check(collection, &updated, Some(&previous))?;
                state.documents[index] = updated.clone();
                Some(if after { updated } else { previous })
            }
            None if options.is_upsert() => {
                let mut doc = eval::seed_from_filter(filter)?;
                eval::apply_update(&mut doc, update, true, now)?;
                let id = self.insert(collection, doc)?;
                if after {
                    self.documents(collection)
                        .iter()
                        .find(|d| d.get("_id") == Some(&id))
                        .cloned()
                } else {
                    None
                }
            }
            None => None,
        };

        Ok(FindAndModifyResult {
            ok: self.find_and_modify_ok,
            value: project_optional(value, options),
        })
    }

    fn find_one_and_delete(
        &mut self,
        collection: &str,
        filter: &Document,
        options: &OperationOptions,
    ) -> StoreResult<FindAndModifyResult> {
        let value = match self.position(collection, filter, options)? {
            Some(index) => Some(self.collection_mut(collection).documents.remove(index)),
            None => None,
        };
        Ok(FindAndModifyResult {
            ok: self.find_and_modify_ok,
            value: project_optional(value, options),
        })
    }

    fn bulk_write(
        &mut self,
        collection: &str,
        operations: Vec<WriteModel>,
        ordered: bool,
        ignore_undefined: bool,
    ) -> StoreResult<BulkWriteResult> {
        let mut result = BulkWriteResult {
            acknowledged: self.acknowledged,
            ..Default::default()
        };
        let mut first_error = None;

        for operation in operations {
            let multi = matches!(
                operation,
                WriteModel::UpdateMany { .. } | WriteModel::DeleteMany { .. }
            );
            let outcome = match operation {
                WriteModel::InsertOne { document } => self
                    .insert(collection, eval::scrub_undefined(document, ignore_undefined))
                    .map(|id| {
                        result.inserted_count += 1;
                        result.inserted_ids.push(id);
                    }),
                WriteModel::UpdateOne {
                    filter,
                    update,
                    upsert,
                }
                | WriteModel::UpdateMany {
                    filter,
                    update,
                    upsert,
                } => self
                    .update(
                        collection,
                        &filter,
                        &eval::scrub_update(update, ignore_undefined),
                        upsert,
                        multi,
                    )
                    .map(|update| merge_update(&mut result, update)),
                WriteModel::ReplaceOne {
                    filter,
                    replacement,
                    upsert,
                } => self
                    .replace(
                        collection,
                        &filter,
                        eval::scrub_undefined(replacement, ignore_undefined),
                        upsert,
                    )
                    .map(|update| merge_update(&mut result, update)),
                WriteModel::DeleteOne { filter } | WriteModel::DeleteMany { filter } => self
                    .delete(collection, &filter, multi)
                    .map(|delete| result.deleted_count += delete.deleted_count),
            };
            if let Err(err) = outcome {
                if ordered {
                    return Err(err);
                }
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }
}

fn merge_update(result: &mut BulkWriteResult, update: UpdateResult) {
    result.matched_count += update.matched_count;
    result.modified_count += update.modified_count;
    result.upserted_count += update.upserted_count;
    result.upserted_ids.extend(update.upserted_id);
}

fn project_optional(value: Option<Document>, options: &OperationOptions) -> Option<Document> {
    match (&options.projection, value) {
        (Some(projection), Some(doc)) => Some(eval::project(&doc, projection)),
        (_, value) => value,
    }
}

fn lock(state: &Mutex<DatabaseState>) -> MutexGuard<'_, DatabaseState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An in-memory database. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    name: String,
    state: Arc<Mutex<DatabaseState>>,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(DatabaseState::default())),
        }
    }

    /// Every call received so far, oldest first
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.state).calls.clone()
    }

    /// Calls with the given store-side method name
    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| call.method == method)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    /// Makes the next call fail with `error` after it is recorded.
    /// Queued errors are consumed in order.
    pub fn fail_next(&self, error: StoreError) {
        lock(&self.state).pending_failures.push_back(error);
    }

    /// Controls the `acknowledged` flag of write results
    pub fn set_acknowledged(&self, acknowledged: bool) {
        lock(&self.state).acknowledged = acknowledged;
    }

    /// Controls the `ok` flag of find-and-modify replies
    pub fn set_find_and_modify_ok(&self, ok: bool) {
        lock(&self.state).find_and_modify_ok = ok;
    }

    /// Snapshot of a collection's documents in insertion order
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        lock(&self.state).documents(collection).to_vec()
    }

    pub fn collection_info(&self, collection: &str) -> Option<CollectionInfo> {
        lock(&self.state)
            .collections
            .get(collection)
            .map(|state| state.info(collection))
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new("test")
    }
}

impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        Arc::new(MemoryCollection {
            name: name.to_string(),
            state: Arc::clone(&self.state),
        })
    }

    fn list_collections(&self, name: Option<String>) -> StoreFuture<'_, Vec<CollectionInfo>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            let target = name.clone().unwrap_or_default();
            let arguments = name.iter().map(|n| Bson::from(n.as_str())).collect();
            state.record(&target, "listCollections", arguments, &OperationOptions::default())?;
            Ok(state
                .collections
                .iter()
                .filter(|(collection, _)| name.as_deref().map_or(true, |n| n == collection.as_str()))
                .map(|(collection, info)| info.info(collection))
                .collect())
        })
    }

    fn create_collection(
        &self,
        name: String,
        options: CreateCollectionOptions,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(
                &name,
                "create",
                vec![
                    Bson::from(name.as_str()),
                    Bson::Document(doc! {
                        "validator": options.validator.clone(),
                        "validationAction": options.validation_action.as_str(),
                        "validationLevel": options.validation_level.as_str(),
                    }),
                ],
                &OperationOptions::default(),
            )?;
            if state.collections.contains_key(&name) {
                return Err(StoreError::namespace_exists(&format!("{}.{}", self.name, name)));
            }
            let collection = state.collection_mut(&name);
            collection.install_validator(options.validator);
            collection.validation_action = options.validation_action;
            collection.validation_level = options.validation_level;
            debug!(collection = %name, "collection created");
            Ok(())
        })
    }

    fn run_command(&self, command: Document) -> StoreFuture<'_, Document> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            let (name, target) = match command.iter().next() {
                Some((name, target)) => (name.clone(), target.as_str().unwrap_or_default().to_string()),
                None => return Err(StoreError::bad_value("empty command")),
            };
            state.record(
                &target,
                &name,
                vec![Bson::Document(command.clone())],
                &OperationOptions::default(),
            )?;

            match name.as_str() {
                "ping" => Ok(doc! { "ok": 1.0 }),
                "collMod" => {
                    let action = match command.get_str("validationAction") {
                        Ok(action) => Some(ValidationAction::parse(action).ok_or_else(|| {
                            StoreError::bad_value(format!("invalid validationAction: {}", action))
                        })?),
                        Err(_) => None,
                    };
                    let level = match command.get_str("validationLevel") {
                        Ok(level) => Some(ValidationLevel::parse(level).ok_or_else(|| {
                            StoreError::bad_value(format!("invalid validationLevel: {}", level))
                        })?),
                        Err(_) => None,
                    };
                    let namespace = format!("{}.{}", self.name, target);
                    let collection = state
                        .collections
                        .get_mut(&target)
                        .ok_or_else(|| StoreError::namespace_not_found(&namespace))?;
                    if let Ok(validator) = command.get_document("validator") {
                        collection.install_validator(validator.clone());
                    }
                    if let Some(action) = action {
                        collection.validation_action = action;
                    }
                    if let Some(level) = level {
                        collection.validation_level = level;
                    }
                    debug!(collection = %target, "collection modified");
                    Ok(doc! { "ok": 1.0 })
                }
                other => Err(StoreError::command_not_found(other)),
            }
        })
    }
}

/// Collection handle over a [`MemoryDatabase`]
#[derive(Debug, Clone)]
pub struct MemoryCollection {
    name: String,
    state: Arc<Mutex<DatabaseState>>,
}

impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn insert_one(
        &self,
        document: Document,
        options: OperationOptions,
    ) -> StoreFuture<'_, InsertOneResult> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(&self.name, "insertOne", vec![Bson::Document(document.clone())], &options)?;
            let inserted_id =
                state.insert(&self.name, eval::scrub_undefined(document, options.ignore_undefined))?;
            Ok(InsertOneResult {
                acknowledged: state.acknowledged,
                inserted_id,
            })
        })
    }

    fn insert_many(
        &self,
        documents: Vec<Document>,
        options: OperationOptions,
    ) -> StoreFuture<'_, InsertManyResult> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            let arguments = vec![Bson::Array(
                documents.iter().cloned().map(Bson::Document).collect(),
            )];
            state.record(&self.name, "insertMany", arguments, &options)?;
            let mut inserted_ids = Vec::with_capacity(documents.len());
            for document in documents {
                let document = eval::scrub_undefined(document, options.ignore_undefined);
                inserted_ids.push(state.insert(&self.name, document)?);
            }
            Ok(InsertManyResult {
                acknowledged: state.acknowledged,
                inserted_count: inserted_ids.len() as u64,
                inserted_ids,
            })
        })
    }

    fn find(
        &self,
        filter: Document,
        options: OperationOptions,
    ) -> StoreFuture<'_, Vec<Document>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(&self.name, "find", vec![Bson::Document(filter.clone())], &options)?;
            state.select(&self.name, &filter, &options)
        })
    }

    fn find_one(
        &self,
        filter: Document,
        options: OperationOptions,
    ) -> StoreFuture<'_, Option<Document>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(&self.name, "findOne", vec![Bson::Document(filter.clone())], &options)?;
            let options = options.with_limit(1);
            Ok(state.select(&self.name, &filter, &options)?.into_iter().next())
        })
    }

    fn find_one_and_update(
        &self,
        filter: Document,
        update: UpdateModifications,
        options: OperationOptions,
    ) -> StoreFuture<'_, FindAndModifyResult> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            let arguments = vec![Bson::Document(filter.clone()), Bson::from(update.clone())];
            state.record(&self.name, "findOneAndUpdate", arguments, &options)?;
            let update = eval::scrub_update(update, options.ignore_undefined);
            state.find_one_and_update(&self.name, &filter, &update, &options)
        })
    }

    fn find_one_and_delete(
        &self,
        filter: Document,
        options: OperationOptions,
    ) -> StoreFuture<'_, FindAndModifyResult> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            let arguments = vec![Bson::Document(filter.clone())];
            state.record(&self.name, "findOneAndDelete", arguments, &options)?;
            state.find_one_and_delete(&self.name, &filter, &options)
        })
    }

    fn update_one(
        &self,
        filter: Document,
        update: UpdateModifications,
        options: OperationOptions,
    ) -> StoreFuture<'_, UpdateResult> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            let arguments = vec![Bson::Document(filter.clone()), Bson::from(update.clone())];
            state.record(&self.name, "updateOne", arguments, &options)?;
            let update = eval::scrub_update(update, options.ignore_undefined);
            state.update(&self.name, &filter, &update, options.is_upsert(), false)
        })
    }

    fn update_many(
        &self,
        filter: Document,
        update: UpdateModifications,
        options: OperationOptions,
    ) -> StoreFuture<'_, UpdateResult> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            let arguments = vec![Bson::Document(filter.clone()), Bson::from(update.clone())];
            state.record(&self.name, "updateMany", arguments, &options)?;
            let update = eval::scrub_update(update, options.ignore_undefined);
            state.update(&self.name, &filter, &update, options.is_upsert(), true)
        })
    }

    fn delete_one(
        &self,
        filter: Document,
        options: OperationOptions,
    ) -> StoreFuture<'_, DeleteResult> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(&self.name, "deleteOne", vec![Bson::Document(filter.clone())], &options)?;
            state.delete(&self.name, &filter, false)
        })
    }

    fn delete_many(
        &self,
        filter: Document,
        options: OperationOptions,
    ) -> StoreFuture<'_, DeleteResult> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(&self.name, "deleteMany", vec![Bson::Document(filter.clone())], &options)?;
            state.delete(&self.name, &filter, true)
        })
    }

    fn bulk_write(
        &self,
        operations: Vec<WriteModel>,
        options: OperationOptions,
    ) -> StoreFuture<'_, BulkWriteResult> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            let arguments = vec![Bson::Array(
                operations
                    .iter()
                    .map(|op| Bson::Document(op.to_document()))
                    .collect(),
            )];
            state.record(&self.name, "bulkWrite", arguments, &options)?;
            if operations.is_empty() {
                return Err(StoreError::bad_value("Invalid BulkOperation, Batch cannot be empty"));
            }
            state.bulk_write(
                &self.name,
                operations,
                options.ordered.unwrap_or(true),
                options.ignore_undefined,
            )
        })
    }

    fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: OperationOptions,
    ) -> StoreFuture<'_, Vec<Document>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            let arguments = vec![Bson::Array(
                pipeline.iter().cloned().map(Bson::Document).collect(),
            )];
            state.record(&self.name, "aggregate", arguments, &options)?;
            eval::run_pipeline(state.documents(&self.name).to_vec(), &pipeline)
        })
    }

    fn distinct(
        &self,
        key: String,
        filter: Document,
        options: OperationOptions,
    ) -> StoreFuture<'_, Vec<Bson>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            let arguments = vec![Bson::from(key.as_str()), Bson::Document(filter.clone())];
            state.record(&self.name, "distinct", arguments, &options)?;
            let mut values: Vec<Bson> = Vec::new();
            for doc in state.select(&self.name, &filter, &OperationOptions::default())? {
                let found = match eval::get_path(&doc, &key) {
                    Some(Bson::Array(items)) => items.clone(),
                    Some(value) => vec![value.clone()],
                    None => Vec::new(),
                };
                for value in found {
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
            }
            Ok(values)
        })
    }

    fn count_documents(
        &self,
        filter: Document,
        options: OperationOptions,
    ) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(&self.name, "countDocuments", vec![Bson::Document(filter.clone())], &options)?;
            let counting = OperationOptions {
                projection: None,
                ..options
            };
            Ok(state.select(&self.name, &filter, &counting)?.len() as u64)
        })
    }

    fn estimated_document_count(&self, options: OperationOptions) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(&self.name, "estimatedDocumentCount", Vec::new(), &options)?;
            Ok(state.documents(&self.name).len() as u64)
        })
    }
}
