//! docmodel - schema-driven document models over a MongoDB-style store
//!
//! - [`schema`]: field descriptors, compilation into a `$jsonSchema`
//!   validator, parsing validators back, local document validation
//! - [`mutation`]: defaults, timestamps and upsert shaping of write payloads
//! - [`store`]: the document store boundary and an in-memory implementation
//! - [`model`]: CRUD wrapper with hooks, plus an explicit model registry
//! - [`sync`]: installing a schema's validator on the store

pub mod model;
pub mod mutation;
pub mod schema;
pub mod store;
pub mod sync;

pub use model::{Model, ModelError, ModelOptions, ModelRegistry, ModelResult};
pub use schema::{Schema, SchemaError, SchemaOptions, SchemaResult};
pub use store::{Collection, Database, OperationOptions, StoreError, StoreResult};
pub use sync::{is_validator_current, sync_schema, SyncOutcome};
