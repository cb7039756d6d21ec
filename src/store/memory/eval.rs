//! Query and update evaluation for the in-memory store
//!
//! Supports the subset of the query language the model layer and its
//! tests rely on:
//! - filters: equality (dotted paths, array membership), `$eq`, `$ne`,
//!   `$in`, `$nin`, `$exists`, `$gt`, `$gte`, `$lt`, `$lte`, `$and`,
//!   `$or`, `$nor`
//! - updates: `$set`, `$unset`, `$inc`, `$push` (with `$each`),
//!   `$currentDate`, `$setOnInsert`, and pipelines of `$set` /
//!   `$addFields` / `$unset` stages
//! - aggregation: `$match`, `$project`, `$sort`, `$skip`, `$limit`, `$count`

use std::cmp::Ordering;

use bson::{Bson, DateTime, Document};

use crate::store::{StoreError, StoreResult, UpdateModifications};

pub(super) fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

pub(super) fn set_path(doc: &mut Document, path: &str, value: Bson) -> StoreResult<()> {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !doc.contains_key(head) {
                doc.insert(head, Document::new());
            }
            match doc.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, rest, value),
                Some(other) => Err(StoreError::bad_value(format!(
                    "Cannot create field '{}' in element {{{}: {}}}",
                    rest, head, other
                ))),
                None => Ok(()),
            }
        }
    }
}

fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

/// Returns whether `doc` satisfies `filter`.
pub(super) fn matches(doc: &Document, filter: &Document) -> StoreResult<bool> {
    for (key, condition) in filter {
        let satisfied = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(condition)? {
                    if !matches(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => any_clause(doc, condition)?,
            "$nor" => !any_clause(doc, condition)?,
            op if op.starts_with('$') => {
                return Err(StoreError::bad_value(format!(
                    "unknown top level operator: {}",
                    op
                )))
            }
            _ => matches_condition(get_path(doc, key), condition)?,
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_clause(doc: &Document, condition: &Bson) -> StoreResult<bool> {
    for clause in clauses(condition)? {
        if matches(doc, clause)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn clauses(condition: &Bson) -> StoreResult<Vec<&Document>> {
    let items = match condition {
        Bson::Array(items) if !items.is_empty() => items,
        _ => {
            return Err(StoreError::bad_value(
                "$and/$or/$nor must be a nonempty array",
            ))
        }
    };
    items
        .iter()
        .map(|item| {
            item.as_document()
                .ok_or_else(|| StoreError::bad_value("$or/$and/$nor entries need to be full objects"))
        })
        .collect()
}

fn operator_document(value: &Bson) -> Option<&Document> {
    match value {
        Bson::Document(doc) if doc.keys().next().map_or(false, |k| k.starts_with('$')) => {
            Some(doc)
        }
        _ => None,
    }
}

fn matches_condition(value: Option<&Bson>, condition: &Bson) -> StoreResult<bool> {
    let operators = match operator_document(condition) {
        Some(operators) => operators,
        None => return Ok(equals(value, condition)),
    };

    for (op, operand) in operators {
        let satisfied = match op.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$in" => in_list(value, operand)?,
            "$nin" => !in_list(value, operand)?,
            "$exists" => value.is_some() == truthy(operand),
            "$gt" => compares(value, operand, |o| o == Ordering::Greater),
            "$gte" => compares(value, operand, |o| o != Ordering::Less),
            "$lt" => compares(value, operand, |o| o == Ordering::Less),
            "$lte" => compares(value, operand, |o| o != Ordering::Greater),
            other => {
                return Err(StoreError::bad_value(format!("unknown operator: {}", other)))
            }
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn equals(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| same_value(item, expected))
        }
        Some(value) => same_value(value, expected),
    }
}

fn in_list(value: Option<&Bson>, operand: &Bson) -> StoreResult<bool> {
    match operand {
        Bson::Array(candidates) => Ok(candidates.iter().any(|c| equals(value, c))),
        _ => Err(StoreError::bad_value("$in needs an array")),
    }
}

fn compares(value: Option<&Bson>, operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    match value {
        None => false,
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| compare_values(item, operand).map_or(false, &accept)),
        Some(value) => compare_values(value, operand).map_or(false, accept),
    }
}

fn same_value(a: &Bson, b: &Bson) -> bool {
    a == b || compare_values(a, b) == Some(Ordering::Equal)
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Long addition, widened to a double on overflow
fn add_long(a: i64, b: i64) -> Bson {
    match a.checked_add(b) {
        Some(sum) => Bson::Int64(sum),
        None => Bson::Double(a as f64 + b as f64),
    }
}

fn compare_values(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.timestamp_millis().cmp(&y.timestamp_millis())),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

pub(super) fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        other => as_number(other).map_or(true, |n| n != 0.0),
    }
}

/// Applies an inclusion or exclusion projection. `_id` stays unless
/// explicitly excluded.
pub(super) fn project(doc: &Document, projection: &Document) -> Document {
    let include_id = projection.get("_id").map_or(true, truthy);
    let fields: Vec<(&String, bool)> = projection
        .iter()
        .filter(|(key, _)| key.as_str() != "_id")
        .map(|(key, value)| (key, truthy(value)))
        .collect();

    if fields.iter().any(|(_, included)| *included) {
        let mut projected = Document::new();
        if include_id {
            if let Some(id) = doc.get("_id") {
                projected.insert("_id", id.clone());
            }
        }
        for (path, _) in fields.iter().filter(|(_, included)| *included) {
            if let Some(value) = get_path(doc, path) {
                // set_path only fails on a scalar parent, which a fresh document never has
                let _ = set_path(&mut projected, path, value.clone());
            }
        }
        projected
    } else {
        let mut projected = doc.clone();
        for (path, _) in &fields {
            remove_path(&mut projected, path);
        }
        if !include_id {
            projected.remove("_id");
        }
        projected
    }
}

fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => 0,
        Some(Bson::Int32(_)) | Some(Bson::Int64(_)) | Some(Bson::Double(_)) => 1,
        Some(Bson::String(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::Binary(_)) => 5,
        Some(Bson::ObjectId(_)) => 6,
        Some(Bson::Boolean(_)) => 7,
        Some(Bson::DateTime(_)) => 8,
        Some(_) => 9,
    }
}

pub(super) fn sort_documents(docs: &mut [Document], sort: &Document) {
    docs.sort_by(|a, b| {
        for (key, direction) in sort {
            let (x, y) = (get_path(a, key), get_path(b, key));
            let ordering = match type_rank(x).cmp(&type_rank(y)) {
                Ordering::Equal => match (x, y) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                },
                other => other,
            };
            let ordering = if as_number(direction).map_or(false, |d| d < 0.0) {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Seeds an upserted document from the equality conditions of a filter.
pub(super) fn seed_from_filter(filter: &Document) -> StoreResult<Document> {
    let mut seeded = Document::new();
    for (key, condition) in filter {
        if key.starts_with('$') {
            continue;
        }
        match operator_document(condition) {
            Some(operators) => {
                if let Some(value) = operators.get("$eq") {
                    set_path(&mut seeded, key, value.clone())?;
                }
            }
            None => set_path(&mut seeded, key, condition.clone())?,
        }
    }
    Ok(seeded)
}

/// Rejects operator documents that address one path (or a path and its
/// parent) from two operators.
pub(super) fn check_update_paths(update: &UpdateModifications) -> StoreResult<()> {
    let update = match update {
        UpdateModifications::Document(update) => update,
        UpdateModifications::Pipeline(_) => return Ok(()),
    };
    let mut seen: Vec<&str> = Vec::new();
    for (_, fields) in update {
        if let Bson::Document(fields) = fields {
            for path in fields.keys() {
                if let Some(conflict) = seen.iter().find(|other| paths_overlap(other, path)) {
                    return Err(StoreError::conflicting_paths(path, conflict));
                }
                seen.push(path);
            }
        }
    }
    Ok(())
}

fn paths_overlap(a: &str, b: &str) -> bool {
    a == b
        || b.strip_prefix(a).map_or(false, |rest| rest.starts_with('.'))
        || a.strip_prefix(b).map_or(false, |rest| rest.starts_with('.'))
}

/// Applies an update to `doc`. `inserting` marks the insert half of an upsert.
pub(super) fn apply_update(
    doc: &mut Document,
    update: &UpdateModifications,
    inserting: bool,
    now: DateTime,
) -> StoreResult<()> {
    match update {
        UpdateModifications::Document(update) => apply_operators(doc, update, inserting, now),
        UpdateModifications::Pipeline(stages) => apply_pipeline(doc, stages, now),
    }
}

fn apply_operators(
    doc: &mut Document,
    update: &Document,
    inserting: bool,
    now: DateTime,
) -> StoreResult<()> {
    if update.is_empty() {
        return Err(StoreError::bad_value("Update document requires atomic operators"));
    }
    for (op, fields) in update {
        let fields = match fields {
            Bson::Document(fields) => fields,
            _ if !op.starts_with('$') => {
                return Err(StoreError::bad_value("Update document requires atomic operators"))
            }
            _ => {
                return Err(StoreError::bad_value(format!(
                    "Modifiers operate on fields but we found another type instead for {}",
                    op
                )))
            }
        };
        for (path, value) in fields {
            match op.as_str() {
                "$set" => set_path(doc, path, value.clone())?,
                "$setOnInsert" => {
                    if inserting {
                        set_path(doc, path, value.clone())?;
                    }
                }
                "$unset" => remove_path(doc, path),
                "$inc" => {
                    let increment = as_number(value).ok_or_else(|| {
                        StoreError::bad_value(format!("Cannot increment with non-numeric argument: {{{}: {}}}", path, value))
                    })?;
                    let next = match (get_path(doc, path), value) {
                        (None, _) => value.clone(),
                        (Some(Bson::Int32(v)), Bson::Int32(by)) => match v.checked_add(*by) {
                            Some(sum) => Bson::Int32(sum),
                            None => Bson::Int64(i64::from(*v) + i64::from(*by)),
                        },
                        (Some(Bson::Int32(v)), Bson::Int64(by)) => add_long(i64::from(*v), *by),
                        (Some(Bson::Int64(v)), Bson::Int32(by)) => add_long(*v, i64::from(*by)),
                        (Some(Bson::Int64(v)), Bson::Int64(by)) => add_long(*v, *by),
                        (Some(current), _) => match as_number(current) {
                            Some(current) => Bson::Double(current + increment),
                            None => {
                                return Err(StoreError::bad_value(format!(
                                    "Cannot apply $inc to a value of non-numeric type at '{}'",
                                    path
                                )))
                            }
                        },
                    };
                    set_path(doc, path, next)?;
                }
                "$push" => {
                    let additions = match value {
                        Bson::Document(modifier) if modifier.contains_key("$each") => {
                            match modifier.get("$each") {
                                Some(Bson::Array(items)) => items.clone(),
                                _ => return Err(StoreError::bad_value("$each must be an array")),
                            }
                        }
                        other => vec![other.clone()],
                    };
                    let next = match get_path(doc, path) {
                        None => additions,
                        Some(Bson::Array(items)) => {
                            let mut items = items.clone();
                            items.extend(additions);
                            items
                        }
                        Some(_) => {
                            return Err(StoreError::bad_value(format!(
                                "The field '{}' must be an array",
                                path
                            )))
                        }
                    };
                    set_path(doc, path, Bson::Array(next))?;
                }
                "$currentDate" => set_path(doc, path, Bson::DateTime(now))?,
                other => {
                    return Err(StoreError::bad_value(format!(
                        "Unknown modifier: {}",
                        other
                    )))
                }
            }
        }
    }
    Ok(())
}

fn apply_pipeline(doc: &mut Document, stages: &[Document], now: DateTime) -> StoreResult<()> {
    for stage in stages {
        for (name, body) in stage {
            match (name.as_str(), body) {
                ("$set", Bson::Document(fields)) | ("$addFields", Bson::Document(fields)) => {
                    for (path, value) in fields {
                        let value = match value {
                            Bson::String(s) if s == "$$NOW" => Bson::DateTime(now),
                            other => other.clone(),
                        };
                        set_path(doc, path, value)?;
                    }
                }
                ("$unset", Bson::String(path)) => remove_path(doc, path),
                ("$unset", Bson::Array(paths)) => {
                    for path in paths.iter().filter_map(Bson::as_str) {
                        remove_path(doc, path);
                    }
                }
                (other, _) => {
                    return Err(StoreError::bad_value(format!(
                        "Unsupported update pipeline stage: {}",
                        other
                    )))
                }
            }
        }
    }
    Ok(())
}

/// Runs an aggregation pipeline over `docs`.
pub(super) fn run_pipeline(mut docs: Vec<Document>, pipeline: &[Document]) -> StoreResult<Vec<Document>> {
    for stage in pipeline {
        let (name, body) = stage
            .iter()
            .next()
            .ok_or_else(|| StoreError::bad_value("a pipeline stage must contain exactly one field"))?;
        docs = match (name.as_str(), body) {
            ("$match", Bson::Document(filter)) => {
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches(&doc, filter)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            ("$project", Bson::Document(projection)) => {
                docs.iter().map(|doc| project(doc, projection)).collect()
            }
            ("$sort", Bson::Document(sort)) => {
                sort_documents(&mut docs, sort);
                docs
            }
            ("$skip", count) => docs.into_iter().skip(stage_count(count)?).collect(),
            ("$limit", count) => docs.into_iter().take(stage_count(count)?).collect(),
            ("$count", Bson::String(field)) => {
                let mut counted = Document::new();
                counted.insert(field.as_str(), docs.len() as i64);
                vec![counted]
            }
            (other, _) => {
                return Err(StoreError::bad_value(format!(
                    "Unrecognized pipeline stage name: '{}'",
                    other
                )))
            }
        };
    }
    Ok(docs)
}

fn stage_count(value: &Bson) -> StoreResult<usize> {
    match as_number(value) {
        Some(n) if n >= 0.0 => Ok(n as usize),
        _ => Err(StoreError::bad_value(format!(
            "expected a non-negative number, got {}",
            value
        ))),
    }
}

/// Drops (`ignore`) or nulls out undefined values, recursively.
pub(super) fn scrub_undefined(doc: Document, ignore: bool) -> Document {
    doc.into_iter()
        .filter_map(|(key, value)| scrub_value(value, ignore).map(|value| (key, value)))
        .collect()
}

pub(super) fn scrub_update(update: UpdateModifications, ignore: bool) -> UpdateModifications {
    match update {
        UpdateModifications::Document(update) => {
            UpdateModifications::Document(scrub_undefined(update, ignore))
        }
        pipeline => pipeline,
    }
}

fn scrub_value(value: Bson, ignore: bool) -> Option<Bson> {
    match value {
        Bson::Undefined if ignore => None,
        Bson::Undefined => Some(Bson::Null),
        Bson::Document(inner) => Some(Bson::Document(scrub_undefined(inner, ignore))),
        Bson::Array(items) => Some(Bson::Array(
            items
                .into_iter()
                .map(|item| scrub_value(item, ignore).unwrap_or(Bson::Null))
                .collect(),
        )),
        other => Some(other),
    }
}
