//! Schema compiler
//!
//! Turns a property list and [`SchemaOptions`] into a [`Schema`]: one root
//! object descriptor with the identifier and timestamp properties injected,
//! every required marker consumed and stripped, and the options kept beside
//! the tree rather than inside it.

use std::collections::HashSet;

use bson::{doc, Document};

use super::errors::{SchemaError, SchemaResult};
use super::field::{date, number, object, object_id, string};
use super::options::{IdentifierKind, SchemaOptions, TimestampFields};
use super::types::{FieldDescriptor, FieldKind, ObjectShape};
use super::validator::compile_pattern;

/// Name of the identifier property
pub const ID_FIELD: &str = "_id";

/// The compiled root descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDescriptor {
    root: FieldDescriptor,
    timestamp_names: Option<TimestampFields>,
}

impl SchemaDescriptor {
    pub fn root(&self) -> &FieldDescriptor {
        &self.root
    }

    fn shape(&self) -> &ObjectShape {
        match self.root.kind() {
            FieldKind::Object(shape) => shape,
            _ => unreachable!("schema root is always an object"),
        }
    }

    /// Direct properties in declaration order, identifier first
    pub fn properties(&self) -> &[(String, FieldDescriptor)] {
        &self.shape().properties
    }

    pub fn property(&self, name: &str) -> Option<&FieldDescriptor> {
        self.shape().property(name)
    }

    /// Required list of the root object
    pub fn required(&self) -> &[String] {
        &self.shape().required
    }

    /// Timestamp property names, present only when both properties exist on
    /// the root and are date-typed.
    pub fn timestamp_fields(&self) -> Option<&TimestampFields> {
        let names = self.timestamp_names.as_ref()?;
        let is_date = |name: &str| {
            self.property(name)
                .map(|field| matches!(field.kind(), FieldKind::Date))
                .unwrap_or(false)
        };
        if is_date(&names.created_at) && is_date(&names.updated_at) {
            Some(names)
        } else {
            None
        }
    }

    pub fn has_timestamps(&self) -> bool {
        self.timestamp_fields().is_some()
    }

    /// The pure validator tree: no markers, no schema options.
    pub fn validator(&self) -> Document {
        self.root.to_document()
    }

    /// The validator wrapped the way the store expects it
    pub fn json_schema(&self) -> Document {
        doc! { "$jsonSchema": self.validator() }
    }
}

/// A compiled schema: the descriptor tree plus its options.
#[derive(Debug, Clone)]
pub struct Schema {
    descriptor: SchemaDescriptor,
    options: SchemaOptions,
}

impl Schema {
    /// Compiles a property list into a schema.
    ///
    /// # Errors
    ///
    /// Definition-time errors only:
    /// - a property declared twice
    /// - `_id` declared as a property (use [`SchemaOptions::identifier`])
    /// - a property colliding with a timestamp name
    /// - a pattern that does not compile
    pub fn compile<I, K>(properties: I, options: SchemaOptions) -> SchemaResult<Self>
    where
        I: IntoIterator<Item = (K, FieldDescriptor)>,
        K: Into<String>,
    {
        let timestamp_names = options.timestamps.resolve();

        let mut all: Vec<(String, FieldDescriptor)> =
            vec![(ID_FIELD.to_string(), identifier(options.identifier))];
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(ID_FIELD.to_string());

        for (name, field) in properties {
            let name = name.into();
            if name == ID_FIELD {
                return Err(SchemaError::ReservedProperty(name));
            }
            if !seen.insert(name.clone()) {
                return Err(SchemaError::DuplicateProperty(name));
            }
            all.push((name, field));
        }

        if let Some(names) = &timestamp_names {
            for name in [&names.created_at, &names.updated_at] {
                if !seen.insert(name.clone()) {
                    return Err(SchemaError::DuplicateProperty(name.clone()));
                }
                all.push((name.clone(), date().required()));
            }
        }

        let mut root = FieldDescriptor::from(object(all).required());
        check_patterns(&root)?;
        root.strip_required_markers();

        Ok(Self {
            descriptor: SchemaDescriptor {
                root,
                timestamp_names,
            },
            options,
        })
    }

    pub fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    pub fn options(&self) -> &SchemaOptions {
        &self.options
    }

    pub fn into_parts(self) -> (SchemaDescriptor, SchemaOptions) {
        (self.descriptor, self.options)
    }
}

fn identifier(kind: IdentifierKind) -> FieldDescriptor {
    match kind {
        IdentifierKind::ObjectId => object_id().required(),
        IdentifierKind::String => string().required().into(),
        IdentifierKind::Number => number().required().into(),
    }
}

fn check_patterns(root: &FieldDescriptor) -> SchemaResult<()> {
    for pattern in root.patterns() {
        compile_pattern(pattern)?;
    }
    Ok(())
}
