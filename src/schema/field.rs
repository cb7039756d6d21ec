//! Field descriptor constructors
//!
//! One constructor per field kind. Every field is optional unless
//! `.required()` is called; the enclosing [`object`] reads that marker to
//! build its own `required` list.
//!
//! ```
//! use docmodel::fields;
//! use docmodel::schema::field::{array, number, object, string};
//!
//! let address = object(fields! {
//!     "city" => string().required(),
//!     "zip" => string().pattern("^[0-9]{5}$"),
//! });
//! let tags = array(string()).max_items(10);
//! let age = number().minimum(0.0);
//! # let _ = (address, tags, age);
//! ```

use bson::Bson;

use super::types::{
    ArrayShape, FieldDescriptor, FieldKind, GenericObjectShape, NumberBounds, ObjectShape,
    StringBounds, DEFAULT_KEY_PATTERN,
};

/// Builds a `Vec<(String, FieldDescriptor)>` property list, converting each
/// field builder into a descriptor.
#[macro_export]
macro_rules! fields {
    () => {
        ::std::vec::Vec::<(::std::string::String, $crate::schema::FieldDescriptor)>::new()
    };
    ($($name:expr => $field:expr),+ $(,)?) => {
        vec![$((
            ::std::string::String::from($name),
            $crate::schema::FieldDescriptor::from($field),
        )),+]
    };
}

pub fn boolean() -> FieldDescriptor {
    FieldDescriptor::new(FieldKind::Boolean)
}

pub fn date() -> FieldDescriptor {
    FieldDescriptor::new(FieldKind::Date)
}

pub fn decimal() -> FieldDescriptor {
    FieldDescriptor::new(FieldKind::Decimal)
}

pub fn binary() -> FieldDescriptor {
    FieldDescriptor::new(FieldKind::Binary)
}

pub fn object_id() -> FieldDescriptor {
    FieldDescriptor::new(FieldKind::ObjectId)
}

pub fn null() -> FieldDescriptor {
    FieldDescriptor::new(FieldKind::Null)
}

/// Accepts every representable value
pub fn any() -> FieldDescriptor {
    FieldDescriptor::new(FieldKind::Any)
}

/// Same store-side shape as [`any`]
pub fn unknown() -> FieldDescriptor {
    FieldDescriptor::new(FieldKind::Unknown)
}

/// Field restricted to the given values. Include `Bson::Null` to make it nullable.
pub fn enumeration<I, V>(values: I) -> FieldDescriptor
where
    I: IntoIterator<Item = V>,
    V: Into<Bson>,
{
    FieldDescriptor::new(FieldKind::Enum(values.into_iter().map(Into::into).collect()))
}

/// Field restricted to a single value
pub fn constant(value: impl Into<Bson>) -> FieldDescriptor {
    FieldDescriptor::new(FieldKind::Constant(value.into()))
}

/// Value matching exactly one of the given descriptors
pub fn one_of<I, F>(variants: I) -> FieldDescriptor
where
    I: IntoIterator<Item = F>,
    F: Into<FieldDescriptor>,
{
    FieldDescriptor::new(FieldKind::OneOf(
        variants.into_iter().map(Into::into).collect(),
    ))
}

/// Fixed-length array with one descriptor per position
pub fn tuple<I, F>(items: I) -> FieldDescriptor
where
    I: IntoIterator<Item = F>,
    F: Into<FieldDescriptor>,
{
    FieldDescriptor::new(FieldKind::Tuple(items.into_iter().map(Into::into).collect()))
}

pub fn number() -> NumberField {
    NumberField::default()
}

pub fn string() -> StringField {
    StringField::default()
}

pub fn array(items: impl Into<FieldDescriptor>) -> ArrayField {
    ArrayField {
        shape: ArrayShape {
            items: Box::new(items.into()),
            min_items: None,
            max_items: None,
            unique_items: false,
        },
        required: false,
    }
}

/// Object with named properties.
///
/// The `required` list is computed here from the immediate properties only;
/// markers inside nested objects were already consumed when those objects
/// were built.
pub fn object<I, K>(properties: I) -> ObjectField
where
    I: IntoIterator<Item = (K, FieldDescriptor)>,
    K: Into<String>,
{
    let properties: Vec<(String, FieldDescriptor)> = properties
        .into_iter()
        .map(|(name, field)| (name.into(), field))
        .collect();
    let required = properties
        .iter()
        .filter(|(_, field)| field.is_required())
        .map(|(name, _)| name.clone())
        .collect();

    ObjectField {
        shape: ObjectShape {
            properties,
            required,
            additional_properties: false,
            min_properties: None,
            max_properties: None,
        },
        required: false,
    }
}

/// Object whose keys match a pattern (default `.+`) and whose values all
/// share one descriptor.
pub fn object_generic(value: impl Into<FieldDescriptor>) -> GenericObjectField {
    GenericObjectField {
        shape: GenericObjectShape {
            pattern: DEFAULT_KEY_PATTERN.to_string(),
            value: Box::new(value.into()),
            additional_properties: false,
        },
        required: false,
    }
}

/// Builder for number fields
#[derive(Debug, Clone, Default)]
pub struct NumberField {
    bounds: NumberBounds,
    required: bool,
}

impl NumberField {
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn minimum(mut self, minimum: f64) -> Self {
        self.bounds.minimum = Some(minimum);
        self
    }

    pub fn maximum(mut self, maximum: f64) -> Self {
        self.bounds.maximum = Some(maximum);
        self
    }

    pub fn exclusive_minimum(mut self, minimum: f64) -> Self {
        self.bounds.minimum = Some(minimum);
        self.bounds.exclusive_minimum = true;
        self
    }

    pub fn exclusive_maximum(mut self, maximum: f64) -> Self {
        self.bounds.maximum = Some(maximum);
        self.bounds.exclusive_maximum = true;
        self
    }

    pub fn multiple_of(mut self, multiple_of: f64) -> Self {
        self.bounds.multiple_of = Some(multiple_of);
        self
    }
}

impl From<NumberField> for FieldDescriptor {
    fn from(field: NumberField) -> Self {
        finish(FieldKind::Number(field.bounds), field.required)
    }
}

/// Builder for string fields
#[derive(Debug, Clone, Default)]
pub struct StringField {
    bounds: StringBounds,
    required: bool,
}

impl StringField {
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn min_length(mut self, min_length: i64) -> Self {
        self.bounds.min_length = Some(min_length);
        self
    }

    pub fn max_length(mut self, max_length: i64) -> Self {
        self.bounds.max_length = Some(max_length);
        self
    }

    /// Regular expression the value must match. Checked when the schema is compiled.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.bounds.pattern = Some(pattern.into());
        self
    }
}

impl From<StringField> for FieldDescriptor {
    fn from(field: StringField) -> Self {
        finish(FieldKind::String(field.bounds), field.required)
    }
}

/// Builder for array fields
#[derive(Debug, Clone)]
pub struct ArrayField {
    shape: ArrayShape,
    required: bool,
}

impl ArrayField {
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn min_items(mut self, min_items: i64) -> Self {
        self.shape.min_items = Some(min_items);
        self
    }

    pub fn max_items(mut self, max_items: i64) -> Self {
        self.shape.max_items = Some(max_items);
        self
    }

    pub fn unique_items(mut self) -> Self {
        self.shape.unique_items = true;
        self
    }
}

impl From<ArrayField> for FieldDescriptor {
    fn from(field: ArrayField) -> Self {
        finish(FieldKind::Array(field.shape), field.required)
    }
}

/// Builder for objects with named properties
#[derive(Debug, Clone)]
pub struct ObjectField {
    shape: ObjectShape,
    required: bool,
}

impl ObjectField {
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Allow properties that are not declared
    pub fn additional_properties(mut self, allowed: bool) -> Self {
        self.shape.additional_properties = allowed;
        self
    }

    pub fn min_properties(mut self, min_properties: i64) -> Self {
        self.shape.min_properties = Some(min_properties);
        self
    }

    pub fn max_properties(mut self, max_properties: i64) -> Self {
        self.shape.max_properties = Some(max_properties);
        self
    }
}

impl From<ObjectField> for FieldDescriptor {
    fn from(field: ObjectField) -> Self {
        finish(FieldKind::Object(field.shape), field.required)
    }
}

/// Builder for pattern-keyed objects
#[derive(Debug, Clone)]
pub struct GenericObjectField {
    shape: GenericObjectShape,
    required: bool,
}

impl GenericObjectField {
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.shape.pattern = pattern.into();
        self
    }

    pub fn additional_properties(mut self, allowed: bool) -> Self {
        self.shape.additional_properties = allowed;
        self
    }
}

impl From<GenericObjectField> for FieldDescriptor {
    fn from(field: GenericObjectField) -> Self {
        finish(FieldKind::ObjectGeneric(field.shape), field.required)
    }
}

fn finish(kind: FieldKind, required: bool) -> FieldDescriptor {
    let field = FieldDescriptor::new(kind);
    if required {
        field.required()
    } else {
        field
    }
}
