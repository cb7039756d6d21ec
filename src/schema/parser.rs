//! Validator tree parsing
//!
//! Reads a `$jsonSchema` tree (as produced by [`FieldDescriptor::to_document`]
//! or reported back by the store) into a descriptor. Rendering the parsed
//! descriptor yields the same tree.

use bson::{Bson, Document};

use super::errors::{SchemaError, SchemaResult};
use super::types::{
    ArrayShape, FieldDescriptor, FieldKind, GenericObjectShape, NumberBounds, ObjectShape,
    StringBounds, ANY_BSON_TYPES,
};

/// Parses a validator tree, unwrapping a top-level `$jsonSchema` if present.
pub fn parse_validator(validator: &Document) -> SchemaResult<FieldDescriptor> {
    match validator.get("$jsonSchema") {
        Some(Bson::Document(tree)) => parse_node(tree, "$"),
        Some(_) => Err(SchemaError::malformed("$jsonSchema", "expected a document")),
        None => parse_node(validator, "$"),
    }
}

fn parse_node(node: &Document, path: &str) -> SchemaResult<FieldDescriptor> {
    if let Some(values) = node.get("enum") {
        let values = as_array(values, path, "enum")?;
        let kind = match values.as_slice() {
            [single] => FieldKind::Constant(single.clone()),
            _ => FieldKind::Enum(values.clone()),
        };
        return Ok(FieldDescriptor::new(kind));
    }

    if let Some(variants) = node.get("oneOf") {
        let variants = as_array(variants, path, "oneOf")?;
        let fields = variants
            .iter()
            .enumerate()
            .map(|(i, variant)| {
                let child_path = format!("{}.oneOf[{}]", path, i);
                parse_node(as_document(variant, &child_path)?, &child_path)
            })
            .collect::<SchemaResult<Vec<_>>>()?;
        return Ok(FieldDescriptor::new(FieldKind::OneOf(fields)));
    }

    let bson_type = node
        .get("bsonType")
        .ok_or_else(|| SchemaError::malformed(path, "missing bsonType"))?;

    if let Bson::Array(types) = bson_type {
        let names: Vec<&str> = types.iter().filter_map(Bson::as_str).collect();
        if names == ANY_BSON_TYPES {
            return Ok(FieldDescriptor::new(FieldKind::Any));
        }
        return Err(SchemaError::malformed(path, "unsupported bsonType list"));
    }

    let name = bson_type
        .as_str()
        .ok_or_else(|| SchemaError::malformed(path, "bsonType must be a string"))?;

    let kind = match name {
        "bool" => FieldKind::Boolean,
        "number" => FieldKind::Number(NumberBounds {
            minimum: float(node, "minimum"),
            maximum: float(node, "maximum"),
            exclusive_minimum: flag(node, "exclusiveMinimum"),
            exclusive_maximum: flag(node, "exclusiveMaximum"),
            multiple_of: float(node, "multipleOf"),
        }),
        "string" => FieldKind::String(StringBounds {
            min_length: integer(node, "minLength"),
            max_length: integer(node, "maxLength"),
            pattern: node.get_str("pattern").ok().map(str::to_string),
        }),
        "date" => FieldKind::Date,
        "decimal" => FieldKind::Decimal,
        "binData" => FieldKind::Binary,
        "objectId" => FieldKind::ObjectId,
        "null" => FieldKind::Null,
        "array" => parse_array(node, path)?,
        "object" => parse_object(node, path)?,
        other => {
            return Err(SchemaError::malformed(
                path,
                format!("unsupported bsonType '{}'", other),
            ))
        }
    };

    Ok(FieldDescriptor::new(kind))
}

fn parse_array(node: &Document, path: &str) -> SchemaResult<FieldKind> {
    let items_path = format!("{}.items", path);
    match node.get("items") {
        Some(Bson::Array(items)) => {
            let fields = items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let child_path = format!("{}[{}]", items_path, i);
                    parse_node(as_document(item, &child_path)?, &child_path)
                })
                .collect::<SchemaResult<Vec<_>>>()?;
            Ok(FieldKind::Tuple(fields))
        }
        Some(Bson::Document(items)) => Ok(FieldKind::Array(ArrayShape {
            items: Box::new(parse_node(items, &items_path)?),
            min_items: integer(node, "minItems"),
            max_items: integer(node, "maxItems"),
            unique_items: flag(node, "uniqueItems"),
        })),
        _ => Err(SchemaError::malformed(path, "array without items")),
    }
}

fn parse_object(node: &Document, path: &str) -> SchemaResult<FieldKind> {
    let additional_properties = flag(node, "additionalProperties");

    if let Ok(patterns) = node.get_document("patternProperties") {
        let mut entries = patterns.iter();
        let (pattern, value) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(SchemaError::malformed(
                    path,
                    "patternProperties must hold exactly one pattern",
                ))
            }
        };
        let child_path = format!("{}.patternProperties", path);
        return Ok(FieldKind::ObjectGeneric(GenericObjectShape {
            pattern: pattern.clone(),
            value: Box::new(parse_node(as_document(value, &child_path)?, &child_path)?),
            additional_properties,
        }));
    }

    let properties = match node.get_document("properties") {
        Ok(properties) => properties
            .iter()
            .map(|(name, field)| {
                let child_path = format!("{}.{}", path, name);
                let field = parse_node(as_document(field, &child_path)?, &child_path)?;
                Ok((name.clone(), field))
            })
            .collect::<SchemaResult<Vec<_>>>()?,
        Err(_) => Vec::new(),
    };

    let required = match node.get("required") {
        Some(list) => as_array(list, path, "required")?
            .iter()
            .map(|name| {
                name.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| SchemaError::malformed(path, "required entries must be strings"))
            })
            .collect::<SchemaResult<Vec<_>>>()?,
        None => Vec::new(),
    };

    Ok(FieldKind::Object(ObjectShape {
        properties,
        required,
        additional_properties,
        min_properties: integer(node, "minProperties"),
        max_properties: integer(node, "maxProperties"),
    }))
}

fn as_document<'a>(value: &'a Bson, path: &str) -> SchemaResult<&'a Document> {
    value
        .as_document()
        .ok_or_else(|| SchemaError::malformed(path, "expected a document"))
}

fn as_array<'a>(value: &'a Bson, path: &str, key: &str) -> SchemaResult<&'a Vec<Bson>> {
    value
        .as_array()
        .ok_or_else(|| SchemaError::malformed(path, format!("{} must be an array", key)))
}

fn float(node: &Document, key: &str) -> Option<f64> {
    match node.get(key)? {
        Bson::Double(v) => Some(*v),
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        _ => None,
    }
}

fn integer(node: &Document, key: &str) -> Option<i64> {
    match node.get(key)? {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) => Some(*v as i64),
        _ => None,
    }
}

fn flag(node: &Document, key: &str) -> bool {
    node.get_bool(key).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;
    use crate::schema::compiler::Schema;
    use crate::schema::field::*;
    use crate::schema::options::{SchemaOptions, Timestamps};
    use bson::doc;

    #[test]
    fn test_compiled_schema_round_trips() {
        let schema = Schema::compile(
            fields! {
                "name" => string().required().min_length(1).pattern("^[a-z]+$"),
                "age" => number().minimum(0.0).exclusive_maximum(150.0),
                "tags" => array(string()).max_items(5).unique_items(),
                "point" => tuple([FieldDescriptor::from(number()), number().into()]),
                "status" => enumeration(["a", "b"]),
                "kind" => constant("user"),
                "meta" => object_generic(any()).pattern("^x-"),
                "address" => object(fields! {
                    "city" => string().required(),
                }).additional_properties(true),
                "either" => one_of([FieldDescriptor::from(string()), null()]),
                "avatar" => binary(),
                "balance" => decimal(),
            },
            SchemaOptions::default().with_timestamps(Timestamps::On),
        )
        .unwrap();

        let validator = schema.descriptor().validator();
        let parsed = parse_validator(&schema.descriptor().json_schema()).unwrap();
        assert_eq!(parsed.to_document(), validator);
        assert!(!parsed.has_required_markers());
    }

    #[test]
    fn test_missing_bson_type_is_malformed() {
        let err = parse_validator(&doc! { "properties": {} }).unwrap_err();
        assert_eq!(err.code(), "SCHEMA_MALFORMED_VALIDATOR");
    }

    #[test]
    fn test_unknown_bson_type_is_malformed() {
        let err = parse_validator(&doc! { "bsonType": "timestamp" }).unwrap_err();
        assert!(err.to_string().contains("timestamp"));
    }

    #[test]
    fn test_non_document_json_schema() {
        let err = parse_validator(&doc! { "$jsonSchema": 1 }).unwrap_err();
        assert_eq!(err.code(), "SCHEMA_MALFORMED_VALIDATOR");
    }
}
