//! Schema subsystem
//!
//! Schemas are declared once, in code, as a tree of field descriptors and
//! compiled into a [`Schema`]: a validator tree the store understands plus
//! the options (defaults, timestamps, validation policy) the mutation
//! policy reads.
//!
//! # Design Principles
//!
//! - The validator tree never carries options or required markers
//! - Definition errors surface at compile time, not on the first write
//! - A compiled validator parses back to an equivalent tree

mod compiler;
mod errors;
pub mod field;
mod options;
mod parser;
mod types;
mod validator;

pub use compiler::{Schema, SchemaDescriptor, ID_FIELD};
pub use errors::{SchemaError, SchemaResult, ValidationDetails};
pub use options::{
    Defaults, DefaultsFuture, IdentifierKind, SchemaOptions, TimestampFields, Timestamps,
    ValidationAction, ValidationLevel, CREATED_AT, UPDATED_AT,
};
pub use parser::parse_validator;
pub use types::{
    ArrayShape, FieldDescriptor, FieldKind, GenericObjectShape, NumberBounds, ObjectShape,
    StringBounds, ANY_BSON_TYPES,
};
pub use validator::{validate_document, validate_value};
