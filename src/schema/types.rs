//! Field descriptor definitions
//!
//! A descriptor is a closed tree over the supported field kinds. Every
//! descriptor renders to the store's `$jsonSchema` vocabulary through
//! [`FieldDescriptor::to_document`].

use bson::{doc, Bson, Document};

/// BSON types accepted by `any` and `unknown` fields.
pub const ANY_BSON_TYPES: [&str; 12] = [
    "array", "binData", "bool", "date", "null", "decimal", "double", "int", "long", "object",
    "objectId", "string",
];

/// Default property-name pattern for generic objects.
pub const DEFAULT_KEY_PATTERN: &str = ".+";

/// Numeric constraints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumberBounds {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: bool,
    pub exclusive_maximum: bool,
    pub multiple_of: Option<f64>,
}

/// String constraints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringBounds {
    pub min_length: Option<i64>,
    pub max_length: Option<i64>,
    pub pattern: Option<String>,
}

/// Homogeneous array shape
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayShape {
    pub items: Box<FieldDescriptor>,
    pub min_items: Option<i64>,
    pub max_items: Option<i64>,
    pub unique_items: bool,
}

/// Object with named properties
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectShape {
    /// Properties in declaration order
    pub properties: Vec<(String, FieldDescriptor)>,
    /// Names of the direct properties that must be present
    pub required: Vec<String>,
    pub additional_properties: bool,
    pub min_properties: Option<i64>,
    pub max_properties: Option<i64>,
}

impl ObjectShape {
    /// Looks up a direct property by name
    pub fn property(&self, name: &str) -> Option<&FieldDescriptor> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, field)| field)
    }
}

/// Object whose property names are constrained by a pattern
#[derive(Debug, Clone, PartialEq)]
pub struct GenericObjectShape {
    pub pattern: String,
    pub value: Box<FieldDescriptor>,
    pub additional_properties: bool,
}

/// Supported field kinds
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Boolean,
    Number(NumberBounds),
    String(StringBounds),
    Date,
    Decimal,
    Binary,
    ObjectId,
    /// Explicit allowed-value set (nullable if it contains `null`)
    Enum(Vec<Bson>),
    /// Single allowed value
    Constant(Bson),
    Null,
    Any,
    Unknown,
    Array(ArrayShape),
    Object(ObjectShape),
    ObjectGeneric(GenericObjectShape),
    OneOf(Vec<FieldDescriptor>),
    Tuple(Vec<FieldDescriptor>),
}

impl FieldKind {
    /// Returns the kind name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Boolean => "boolean",
            FieldKind::Number(_) => "number",
            FieldKind::String(_) => "string",
            FieldKind::Date => "date",
            FieldKind::Decimal => "decimal",
            FieldKind::Binary => "binary",
            FieldKind::ObjectId => "objectId",
            FieldKind::Enum(_) => "enum",
            FieldKind::Constant(_) => "constant",
            FieldKind::Null => "null",
            FieldKind::Any => "any",
            FieldKind::Unknown => "unknown",
            FieldKind::Array(_) => "array",
            FieldKind::Object(_) => "object",
            FieldKind::ObjectGeneric(_) => "objectGeneric",
            FieldKind::OneOf(_) => "oneOf",
            FieldKind::Tuple(_) => "tuple",
        }
    }
}

/// A single field's shape and constraints.
///
/// `required` is advisory metadata read by the enclosing object when it is
/// built. It never appears in the rendered validator and is cleared on every
/// node once a schema is compiled.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    kind: FieldKind,
    required: bool,
}

impl FieldDescriptor {
    /// Create an optional descriptor of the given kind
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            required: false,
        }
    }

    /// Mark this descriptor as required by its parent object
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark this descriptor as optional (the default)
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Returns the object shape if this is a named-property object
    pub fn as_object(&self) -> Option<&ObjectShape> {
        match &self.kind {
            FieldKind::Object(shape) => Some(shape),
            _ => None,
        }
    }

    /// Clears the required marker on this node and every descendant.
    pub fn strip_required_markers(&mut self) {
        self.required = false;
        match &mut self.kind {
            FieldKind::Array(shape) => shape.items.strip_required_markers(),
            FieldKind::Object(shape) => {
                for (_, field) in &mut shape.properties {
                    field.strip_required_markers();
                }
            }
            FieldKind::ObjectGeneric(shape) => shape.value.strip_required_markers(),
            FieldKind::OneOf(fields) | FieldKind::Tuple(fields) => {
                for field in fields {
                    field.strip_required_markers();
                }
            }
            _ => {}
        }
    }

    /// Returns true if this node or any descendant still carries a marker.
    pub fn has_required_markers(&self) -> bool {
        if self.required {
            return true;
        }
        match &self.kind {
            FieldKind::Array(shape) => shape.items.has_required_markers(),
            FieldKind::Object(shape) => shape
                .properties
                .iter()
                .any(|(_, field)| field.has_required_markers()),
            FieldKind::ObjectGeneric(shape) => shape.value.has_required_markers(),
            FieldKind::OneOf(fields) | FieldKind::Tuple(fields) => {
                fields.iter().any(FieldDescriptor::has_required_markers)
            }
            _ => false,
        }
    }

    /// Visits every string pattern in the tree (string patterns and
    /// generic-object key patterns), depth first.
    pub fn patterns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_patterns(&mut out);
        out
    }

    fn collect_patterns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match &self.kind {
            FieldKind::String(bounds) => {
                if let Some(pattern) = &bounds.pattern {
                    out.push(pattern);
                }
            }
            FieldKind::Array(shape) => shape.items.collect_patterns(out),
            FieldKind::Object(shape) => {
                for (_, field) in &shape.properties {
                    field.collect_patterns(out);
                }
            }
            FieldKind::ObjectGeneric(shape) => {
                out.push(&shape.pattern);
                shape.value.collect_patterns(out);
            }
            FieldKind::OneOf(fields) | FieldKind::Tuple(fields) => {
                for field in fields {
                    field.collect_patterns(out);
                }
            }
            _ => {}
        }
    }

    /// Renders this descriptor in the store's validator vocabulary.
    pub fn to_document(&self) -> Document {
        match &self.kind {
            FieldKind::Boolean => doc! { "bsonType": "bool" },
            FieldKind::Number(bounds) => {
                let mut out = doc! { "bsonType": "number" };
                if let Some(minimum) = bounds.minimum {
                    out.insert("minimum", minimum);
                    if bounds.exclusive_minimum {
                        out.insert("exclusiveMinimum", true);
                    }
                }
                if let Some(maximum) = bounds.maximum {
                    out.insert("maximum", maximum);
                    if bounds.exclusive_maximum {
                        out.insert("exclusiveMaximum", true);
                    }
                }
                if let Some(multiple_of) = bounds.multiple_of {
                    out.insert("multipleOf", multiple_of);
                }
                out
            }
            FieldKind::String(bounds) => {
                let mut out = doc! { "bsonType": "string" };
                if let Some(min_length) = bounds.min_length {
                    out.insert("minLength", min_length);
                }
                if let Some(max_length) = bounds.max_length {
                    out.insert("maxLength", max_length);
                }
                if let Some(pattern) = &bounds.pattern {
                    out.insert("pattern", pattern.as_str());
                }
                out
            }
            FieldKind::Date => doc! { "bsonType": "date" },
            FieldKind::Decimal => doc! { "bsonType": "decimal" },
            FieldKind::Binary => doc! { "bsonType": "binData" },
            FieldKind::ObjectId => doc! { "bsonType": "objectId" },
            FieldKind::Enum(values) => doc! { "enum": values.clone() },
            FieldKind::Constant(value) => doc! { "enum": [value.clone()] },
            FieldKind::Null => doc! { "bsonType": "null" },
            FieldKind::Any | FieldKind::Unknown => {
                let types: Vec<Bson> = ANY_BSON_TYPES.iter().map(|t| Bson::from(*t)).collect();
                doc! { "bsonType": types }
            }
            FieldKind::Array(shape) => {
                let mut out = doc! {
                    "bsonType": "array",
                    "items": shape.items.to_document(),
                };
                if let Some(min_items) = shape.min_items {
                    out.insert("minItems", min_items);
                }
                if let Some(max_items) = shape.max_items {
                    out.insert("maxItems", max_items);
                }
                if shape.unique_items {
                    out.insert("uniqueItems", true);
                }
                out
            }
            FieldKind::Object(shape) => {
                let mut properties = Document::new();
                for (name, field) in &shape.properties {
                    properties.insert(name.as_str(), field.to_document());
                }
                let mut out = doc! {
                    "bsonType": "object",
                    "properties": properties,
                };
                // `required` must be non-empty when present
                if !shape.required.is_empty() {
                    out.insert("required", shape.required.clone());
                }
                out.insert("additionalProperties", shape.additional_properties);
                if let Some(min_properties) = shape.min_properties {
                    out.insert("minProperties", min_properties);
                }
                if let Some(max_properties) = shape.max_properties {
                    out.insert("maxProperties", max_properties);
                }
                out
            }
            FieldKind::ObjectGeneric(shape) => {
                let mut pattern_properties = Document::new();
                pattern_properties.insert(shape.pattern.as_str(), shape.value.to_document());
                doc! {
                    "bsonType": "object",
                    "patternProperties": pattern_properties,
                    "additionalProperties": shape.additional_properties,
                }
            }
            FieldKind::OneOf(fields) => {
                let variants: Vec<Bson> = fields
                    .iter()
                    .map(|field| Bson::Document(field.to_document()))
                    .collect();
                doc! { "oneOf": variants }
            }
            FieldKind::Tuple(fields) => {
                let items: Vec<Bson> = fields
                    .iter()
                    .map(|field| Bson::Document(field.to_document()))
                    .collect();
                doc! {
                    "bsonType": "array",
                    "items": items,
                    "additionalItems": false,
                }
            }
        }
    }
}
