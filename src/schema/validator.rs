//! Client-side document validation
//!
//! Checks a document against a compiled descriptor with the same rules the
//! store applies for the validator tree:
//! - All required fields are present
//! - No undeclared fields unless `additionalProperties` is set
//! - Field types match (`number` accepts int, long, double and decimal)
//! - Enum, numeric, string and array constraints hold
//!
//! Validation does not mutate documents.

use std::collections::HashSet;

use bson::{Bson, Document};
use fancy_regex::Regex;

use super::compiler::SchemaDescriptor;
use super::errors::{SchemaError, SchemaResult, ValidationDetails};
use super::types::{FieldDescriptor, FieldKind, NumberBounds, ObjectShape, StringBounds};

/// Validates a full document against a compiled schema.
pub fn validate_document(schema: &SchemaDescriptor, document: &Document) -> SchemaResult<()> {
    match schema.root().kind() {
        FieldKind::Object(shape) => validate_object(shape, document, ""),
        _ => validate_value(schema.root(), &Bson::Document(document.clone()), "$root"),
    }
}

/// Validates a single value against a descriptor.
pub fn validate_value(field: &FieldDescriptor, value: &Bson, path: &str) -> SchemaResult<()> {
    match field.kind() {
        FieldKind::Boolean => expect(matches!(value, Bson::Boolean(_)), path, "bool", value),
        FieldKind::Number(bounds) => validate_number(bounds, value, path),
        FieldKind::String(bounds) => validate_string(bounds, value, path),
        FieldKind::Date => expect(matches!(value, Bson::DateTime(_)), path, "date", value),
        FieldKind::Decimal => expect(matches!(value, Bson::Decimal128(_)), path, "decimal", value),
        FieldKind::Binary => expect(matches!(value, Bson::Binary(_)), path, "binData", value),
        FieldKind::ObjectId => expect(matches!(value, Bson::ObjectId(_)), path, "objectId", value),
        FieldKind::Null => expect(matches!(value, Bson::Null), path, "null", value),
        FieldKind::Any | FieldKind::Unknown => Ok(()),
        FieldKind::Enum(values) => {
            if values.contains(value) {
                Ok(())
            } else {
                Err(failed(ValidationDetails::new(
                    path,
                    format!("one of {:?}", values),
                    value.to_string(),
                )))
            }
        }
        FieldKind::Constant(expected) => {
            if expected == value {
                Ok(())
            } else {
                Err(failed(ValidationDetails::new(
                    path,
                    expected.to_string(),
                    value.to_string(),
                )))
            }
        }
        FieldKind::Array(shape) => {
            let items = match value {
                Bson::Array(items) => items,
                _ => return Err(type_error(path, "array", value)),
            };
            check_count(path, "items", items.len(), shape.min_items, shape.max_items)?;
            if shape.unique_items {
                for (i, item) in items.iter().enumerate() {
                    if items[..i].contains(item) {
                        return Err(failed(ValidationDetails::new(
                            format!("{}[{}]", path, i),
                            "unique items",
                            "duplicate",
                        )));
                    }
                }
            }
            for (i, item) in items.iter().enumerate() {
                validate_value(&shape.items, item, &format!("{}[{}]", path, i))?;
            }
            Ok(())
        }
        FieldKind::Tuple(fields) => {
            let items = match value {
                Bson::Array(items) => items,
                _ => return Err(type_error(path, "array", value)),
            };
            if items.len() > fields.len() {
                return Err(failed(ValidationDetails::new(
                    path,
                    format!("at most {} items", fields.len()),
                    items.len().to_string(),
                )));
            }
            for (i, (item, field)) in items.iter().zip(fields).enumerate() {
                validate_value(field, item, &format!("{}[{}]", path, i))?;
            }
            Ok(())
        }
        FieldKind::Object(shape) => match value {
            Bson::Document(doc) => validate_object(shape, doc, path),
            _ => Err(type_error(path, "object", value)),
        },
        FieldKind::ObjectGeneric(shape) => {
            let doc = match value {
                Bson::Document(doc) => doc,
                _ => return Err(type_error(path, "object", value)),
            };
            let pattern = compile_pattern(&shape.pattern)?;
            for (key, item) in doc {
                let item_path = make_path(path, key);
                if is_match(&pattern, key)? {
                    validate_value(&shape.value, item, &item_path)?;
                } else if !shape.additional_properties {
                    return Err(failed(ValidationDetails::extra_field(item_path)));
                }
            }
            Ok(())
        }
        FieldKind::OneOf(fields) => {
            let matches = fields
                .iter()
                .filter(|field| validate_value(field, value, path).is_ok())
                .count();
            if matches == 1 {
                Ok(())
            } else {
                Err(failed(ValidationDetails::new(
                    path,
                    "exactly one matching variant",
                    format!("{} matching variants", matches),
                )))
            }
        }
    }
}

fn validate_object(shape: &ObjectShape, doc: &Document, path: &str) -> SchemaResult<()> {
    for name in &shape.required {
        if !doc.contains_key(name) {
            return Err(failed(ValidationDetails::missing_field(make_path(path, name))));
        }
    }

    check_count(
        path,
        "properties",
        doc.len(),
        shape.min_properties,
        shape.max_properties,
    )?;

    let declared: HashSet<&str> = shape
        .properties
        .iter()
        .map(|(name, _)| name.as_str())
        .collect();

    for (key, value) in doc {
        let field_path = make_path(path, key);
        if !declared.contains(key.as_str()) {
            if shape.additional_properties {
                continue;
            }
            return Err(failed(ValidationDetails::extra_field(field_path)));
        }
        if let Some(field) = shape.property(key) {
            validate_value(field, value, &field_path)?;
        }
    }

    Ok(())
}

fn validate_number(bounds: &NumberBounds, value: &Bson, path: &str) -> SchemaResult<()> {
    let number = match value {
        Bson::Int32(v) => f64::from(*v),
        Bson::Int64(v) => *v as f64,
        Bson::Double(v) => *v,
        // Decimal bounds are left to the store
        Bson::Decimal128(_) => return Ok(()),
        _ => return Err(type_error(path, "number", value)),
    };

    if let Some(minimum) = bounds.minimum {
        let below = if bounds.exclusive_minimum {
            number <= minimum
        } else {
            number < minimum
        };
        if below {
            return Err(failed(ValidationDetails::new(
                path,
                format!("minimum {}", minimum),
                number.to_string(),
            )));
        }
    }
    if let Some(maximum) = bounds.maximum {
        let above = if bounds.exclusive_maximum {
            number >= maximum
        } else {
            number > maximum
        };
        if above {
            return Err(failed(ValidationDetails::new(
                path,
                format!("maximum {}", maximum),
                number.to_string(),
            )));
        }
    }
    if let Some(multiple_of) = bounds.multiple_of {
        if multiple_of != 0.0 && (number / multiple_of).fract() != 0.0 {
            return Err(failed(ValidationDetails::new(
                path,
                format!("multiple of {}", multiple_of),
                number.to_string(),
            )));
        }
    }
    Ok(())
}

fn validate_string(bounds: &StringBounds, value: &Bson, path: &str) -> SchemaResult<()> {
    let text = match value {
        Bson::String(text) => text,
        _ => return Err(type_error(path, "string", value)),
    };
    let length = text.chars().count();
    check_count(path, "characters", length, bounds.min_length, bounds.max_length)?;
    if let Some(pattern) = &bounds.pattern {
        if !is_match(&compile_pattern(pattern)?, text)? {
            return Err(failed(ValidationDetails::new(
                path,
                format!("match for /{}/", pattern),
                text.clone(),
            )));
        }
    }
    Ok(())
}

fn check_count(
    path: &str,
    unit: &str,
    count: usize,
    min: Option<i64>,
    max: Option<i64>,
) -> SchemaResult<()> {
    let count = count as i64;
    if let Some(min) = min {
        if count < min {
            return Err(failed(ValidationDetails::new(
                path,
                format!("at least {} {}", min, unit),
                count.to_string(),
            )));
        }
    }
    if let Some(max) = max {
        if count > max {
            return Err(failed(ValidationDetails::new(
                path,
                format!("at most {} {}", max, unit),
                count.to_string(),
            )));
        }
    }
    Ok(())
}

/// Compiles a `pattern` keyword. Lookaround and backreferences are
/// supported, as in the store's own matcher.
pub(super) fn compile_pattern(pattern: &str) -> SchemaResult<Regex> {
    Regex::new(pattern).map_err(|e| invalid_pattern(pattern, e))
}

fn is_match(regex: &Regex, text: &str) -> SchemaResult<bool> {
    regex
        .is_match(text)
        .map_err(|e| invalid_pattern(regex.as_str(), e))
}

fn invalid_pattern(pattern: &str, error: fancy_regex::Error) -> SchemaError {
    SchemaError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: error.to_string(),
    }
}

fn expect(ok: bool, path: &str, expected: &str, value: &Bson) -> SchemaResult<()> {
    if ok {
        Ok(())
    } else {
        Err(type_error(path, expected, value))
    }
}

/// Returns the BSON type name for error messages.
fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        Bson::DateTime(_) => "date",
        Bson::Binary(_) => "binData",
        Bson::ObjectId(_) => "objectId",
        Bson::Decimal128(_) => "decimal",
        _ => "other",
    }
}

fn make_path(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", prefix, field)
    }
}

fn type_error(path: &str, expected: &str, actual: &Bson) -> SchemaError {
    failed(ValidationDetails::type_mismatch(
        path,
        expected,
        bson_type_name(actual),
    ))
}

fn failed(details: ValidationDetails) -> SchemaError {
    SchemaError::ValidationFailed(details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;
    use crate::schema::compiler::Schema;
    use crate::schema::field::*;
    use crate::schema::options::SchemaOptions;
    use bson::{doc, oid::ObjectId};

    fn user_schema() -> Schema {
        Schema::compile(
            fields! {
                "name" => string().required().min_length(1),
                "age" => number().minimum(0.0),
                "tags" => array(string()).unique_items(),
                "address" => object(fields! {
                    "city" => string().required(),
                }),
                "role" => enumeration(["admin", "member"]),
            },
            SchemaOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_document() {
        let schema = user_schema();
        let doc = doc! {
            "_id": ObjectId::new(),
            "name": "Alice",
            "age": 30,
            "tags": ["a", "b"],
            "address": { "city": "Oslo" },
            "role": "admin",
        };
        assert!(validate_document(schema.descriptor(), &doc).is_ok());
    }

    #[test]
    fn test_missing_required_field() {
        let schema = user_schema();
        let err = validate_document(schema.descriptor(), &doc! { "_id": ObjectId::new() })
            .unwrap_err();
        assert_eq!(err.details().unwrap().field, "name");
    }

    #[test]
    fn test_nested_required_field() {
        let schema = user_schema();
        let doc = doc! { "_id": ObjectId::new(), "name": "A", "address": {} };
        let err = validate_document(schema.descriptor(), &doc).unwrap_err();
        assert_eq!(err.details().unwrap().field, "address.city");
    }

    #[test]
    fn test_extra_field_rejected() {
        let schema = user_schema();
        let doc = doc! { "_id": ObjectId::new(), "name": "A", "nickname": "a" };
        let err = validate_document(schema.descriptor(), &doc).unwrap_err();
        assert_eq!(err.details().unwrap().actual, "extra field present");
    }

    #[test]
    fn test_type_and_bounds() {
        let schema = user_schema();
        let wrong_type = doc! { "_id": ObjectId::new(), "name": "A", "age": "old" };
        assert!(validate_document(schema.descriptor(), &wrong_type).is_err());

        let negative = doc! { "_id": ObjectId::new(), "name": "A", "age": -1 };
        assert!(validate_document(schema.descriptor(), &negative).is_err());

        let empty_name = doc! { "_id": ObjectId::new(), "name": "" };
        assert!(validate_document(schema.descriptor(), &empty_name).is_err());

        let duplicate_tags = doc! { "_id": ObjectId::new(), "name": "A", "tags": ["x", "x"] };
        assert!(validate_document(schema.descriptor(), &duplicate_tags).is_err());

        let bad_role = doc! { "_id": ObjectId::new(), "name": "A", "role": "owner" };
        assert!(validate_document(schema.descriptor(), &bad_role).is_err());
    }

    #[test]
    fn test_one_of_requires_exactly_one_match() {
        let field = one_of([FieldDescriptor::from(string()), null()]);
        assert!(validate_value(&field, &Bson::Null, "v").is_ok());
        assert!(validate_value(&field, &Bson::from("x"), "v").is_ok());
        assert!(validate_value(&field, &Bson::from(1), "v").is_err());

        let overlapping = one_of([any(), unknown()]);
        assert!(validate_value(&overlapping, &Bson::from(1), "v").is_err());
    }

    #[test]
    fn test_lookahead_pattern_matching() {
        let field = FieldDescriptor::from(string().pattern("^(?!admin$).+$"));
        assert!(validate_value(&field, &Bson::from("alice"), "user").is_ok());
        assert!(validate_value(&field, &Bson::from("admin"), "user").is_err());
        assert!(validate_value(&field, &Bson::from("administrator"), "user").is_ok());

        let repeated = FieldDescriptor::from(string().pattern(r"^(\w)\1$"));
        assert!(validate_value(&repeated, &Bson::from("aa"), "pair").is_ok());
        assert!(validate_value(&repeated, &Bson::from("ab"), "pair").is_err());
    }

    #[test]
    fn test_generic_object_keys() {
        let field = FieldDescriptor::from(object_generic(number()).pattern("^n_"));
        assert!(validate_value(&field, &Bson::Document(doc! { "n_a": 1 }), "m").is_ok());
        assert!(validate_value(&field, &Bson::Document(doc! { "x": 1 }), "m").is_err());
        assert!(validate_value(&field, &Bson::Document(doc! { "n_a": "1" }), "m").is_err());
    }

    #[test]
    fn test_tuple_length() {
        let field = tuple([FieldDescriptor::from(number()), number().into()]);
        assert!(validate_value(&field, &bson::bson!([1, 2]), "p").is_ok());
        assert!(validate_value(&field, &bson::bson!([1, 2, 3]), "p").is_err());
    }
}
