//! Document store boundary
//!
//! The model layer talks to a store only through [`Database`] and
//! [`Collection`]. Any backend that can insert, find, update, delete,
//! aggregate and bulk-write documents over named collections, and install
//! a validator on a collection, can sit behind these traits.
//!
//! [`memory::MemoryDatabase`] is the in-process implementation.

mod errors;
pub mod memory;
mod operations;
mod options;
mod results;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bson::{Bson, Document};

pub use errors::{
    StoreError, StoreResult, BAD_VALUE, COMMAND_NOT_FOUND, CONFLICTING_UPDATE_OPERATORS,
    DOCUMENT_VALIDATION_FAILURE, DUPLICATE_KEY, MAX_TIME_MS_EXPIRED, NAMESPACE_EXISTS,
    NAMESPACE_NOT_FOUND,
};
pub use operations::{UpdateModifications, WriteModel};
pub use options::{CollectionInfo, CreateCollectionOptions, OperationOptions, ReturnDocument};
pub use results::{
    BulkWriteResult, DeleteResult, FindAndModifyResult, InsertManyResult, InsertOneResult,
    UpdateResult,
};

/// Future returned by every store call
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// A named collection of documents
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    fn insert_one(
        &self,
        document: Document,
        options: OperationOptions,
    ) -> StoreFuture<'_, InsertOneResult>;

    fn insert_many(
        &self,
        documents: Vec<Document>,
        options: OperationOptions,
    ) -> StoreFuture<'_, InsertManyResult>;

    fn find(&self, filter: Document, options: OperationOptions)
        -> StoreFuture<'_, Vec<Document>>;

    fn find_one(
        &self,
        filter: Document,
        options: OperationOptions,
    ) -> StoreFuture<'_, Option<Document>>;

    fn find_one_and_update(
        &self,
        filter: Document,
        update: UpdateModifications,
        options: OperationOptions,
    ) -> StoreFuture<'_, FindAndModifyResult>;

    fn find_one_and_delete(
        &self,
        filter: Document,
        options: OperationOptions,
    ) -> StoreFuture<'_, FindAndModifyResult>;

    fn update_one(
        &self,
        filter: Document,
        update: UpdateModifications,
        options: OperationOptions,
    ) -> StoreFuture<'_, UpdateResult>;

    fn update_many(
        &self,
        filter: Document,
        update: UpdateModifications,
        options: OperationOptions,
    ) -> StoreFuture<'_, UpdateResult>;

    fn delete_one(&self, filter: Document, options: OperationOptions)
        -> StoreFuture<'_, DeleteResult>;

    fn delete_many(
        &self,
        filter: Document,
        options: OperationOptions,
    ) -> StoreFuture<'_, DeleteResult>;

    fn bulk_write(
        &self,
        operations: Vec<WriteModel>,
        options: OperationOptions,
    ) -> StoreFuture<'_, BulkWriteResult>;

    fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: OperationOptions,
    ) -> StoreFuture<'_, Vec<Document>>;

    fn distinct(
        &self,
        key: String,
        filter: Document,
        options: OperationOptions,
    ) -> StoreFuture<'_, Vec<Bson>>;

    fn count_documents(&self, filter: Document, options: OperationOptions)
        -> StoreFuture<'_, u64>;

    fn estimated_document_count(&self, options: OperationOptions) -> StoreFuture<'_, u64>;
}

/// A database: collection handles plus collection metadata commands
pub trait Database: Send + Sync {
    fn name(&self) -> &str;

    /// Handle to a collection; the collection need not exist yet.
    fn collection(&self, name: &str) -> Arc<dyn Collection>;

    /// Lists collections, optionally only the one with the given name
    fn list_collections(&self, name: Option<String>) -> StoreFuture<'_, Vec<CollectionInfo>>;

    fn create_collection(
        &self,
        name: String,
        options: CreateCollectionOptions,
    ) -> StoreFuture<'_, ()>;

    /// Runs a database command such as `collMod`
    fn run_command(&self, command: Document) -> StoreFuture<'_, Document>;
}
