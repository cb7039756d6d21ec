//! Mutation policy engine
//!
//! Computes the payload a write actually sends to the store: defaults and
//! timestamps merged under inserted documents, `updatedAt` touched on
//! updates, insert-time values bundled into `$setOnInsert` on upserts, and
//! every operation of a bulk write rewritten the same way.
//!
//! # Merge order
//!
//! For inserts the precedence is, lowest first:
//! 1. `{createdAt: now, updatedAt: now}` (timestamped schemas only)
//! 2. the schema defaults
//! 3. the caller's document
//!
//! so explicit values always win and timestamps act as defaults.
//!
//! No function here performs I/O. The only awaits are on an asynchronous
//! defaults factory, which runs once per document payload computed.

mod bulk;
mod clock;

use std::sync::Arc;

use bson::{Bson, Document};

use crate::schema::{Defaults, Schema, TimestampFields};
use crate::store::UpdateModifications;

pub use clock::{Clock, FixedClock, SystemClock};

const SET_ON_INSERT: &str = "$setOnInsert";
const CURRENT_DATE: &str = "$currentDate";

/// Payload rules derived from one compiled schema
#[derive(Debug, Clone)]
pub struct MutationPolicy {
    defaults: Defaults,
    timestamps: Option<TimestampFields>,
    clock: Arc<dyn Clock>,
}

impl MutationPolicy {
    /// Policy for a compiled schema. Timestamps apply only when both
    /// timestamp properties exist on the schema and are date-typed.
    pub fn new(schema: &Schema, clock: Arc<dyn Clock>) -> Self {
        Self {
            defaults: schema.options().defaults.clone(),
            timestamps: schema.descriptor().timestamp_fields().cloned(),
            clock,
        }
    }

    pub fn from_parts(
        defaults: Defaults,
        timestamps: Option<TimestampFields>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            defaults,
            timestamps,
            clock,
        }
    }

    pub fn has_timestamps(&self) -> bool {
        self.timestamps.is_some()
    }

    pub fn timestamp_fields(&self) -> Option<&TimestampFields> {
        self.timestamps.as_ref()
    }

    fn now(&self) -> bson::DateTime {
        bson::DateTime::from_chrono(self.clock.now())
    }

    /// Payload for one inserted document. `now` is sampled once.
    pub async fn insert_document(&self, document: Document) -> Document {
        let mut payload = document;
        fill_missing(&mut payload, self.defaults.resolve().await);
        if let Some(names) = &self.timestamps {
            let now = self.now();
            fill_missing(&mut payload, timestamp_pair(names, now));
        }
        payload
    }

    /// Payloads for an insert of many documents, each computed on its own
    pub async fn insert_documents(&self, documents: Vec<Document>) -> Vec<Document> {
        let mut payloads = Vec::with_capacity(documents.len());
        for document in documents {
            payloads.push(self.insert_document(document).await);
        }
        payloads
    }

    /// Replacement payload: timestamps under the replacement, no defaults
    pub fn replacement(&self, replacement: Document) -> Document {
        let mut payload = replacement;
        if let Some(names) = &self.timestamps {
            fill_missing(&mut payload, timestamp_pair(names, self.now()));
        }
        payload
    }

    /// Update payload for a non-upsert update.
    ///
    /// Adds `$currentDate.updatedAt` unless the caller already sets or
    /// unsets `updatedAt`. `createdAt` is never touched. Pipelines pass
    /// through unchanged.
    pub fn touch(&self, update: UpdateModifications) -> UpdateModifications {
        match (update, &self.timestamps) {
            (UpdateModifications::Document(update), Some(names)) => {
                UpdateModifications::Document(touch_updated_at(update, &names.updated_at))
            }
            (update, _) => update,
        }
    }

    /// Update payload for an upserting update: the `touch` rule plus the
    /// `$setOnInsert` bundle.
    ///
    /// The bundle is `defaults`, then `{createdAt: now}`, then the caller's
    /// own `$setOnInsert`. Any key that another operator of the update
    /// already writes is dropped from it; an empty bundle removes
    /// `$setOnInsert` entirely.
    pub async fn upsert(&self, update: UpdateModifications) -> UpdateModifications {
        let update = match self.touch(update) {
            UpdateModifications::Document(update) => update,
            pipeline => return pipeline,
        };

        let mut bundle = self.defaults.resolve().await;
        if let Some(names) = &self.timestamps {
            bundle.insert(names.created_at.clone(), self.now());
        }
        if let Ok(existing) = update.get_document(SET_ON_INSERT) {
            for (key, value) in existing {
                bundle.insert(key.clone(), value.clone());
            }
        }

        let written = written_paths(&update);
        let bundle: Document = bundle
            .into_iter()
            .filter(|(key, _)| !written.iter().any(|path| paths_overlap(path, key)))
            .collect();

        let mut update = update;
        if bundle.is_empty() {
            update.remove(SET_ON_INSERT);
        } else {
            update.insert(SET_ON_INSERT, bundle);
        }
        UpdateModifications::Document(update)
    }

    /// Dispatches to [`touch`](Self::touch) or [`upsert`](Self::upsert)
    pub async fn update(&self, update: UpdateModifications, upsert: bool) -> UpdateModifications {
        if upsert {
            self.upsert(update).await
        } else {
            self.touch(update)
        }
    }
}

fn timestamp_pair(names: &TimestampFields, now: bson::DateTime) -> Document {
    let mut pair = Document::new();
    pair.insert(names.created_at.clone(), now);
    pair.insert(names.updated_at.clone(), now);
    pair
}

/// Inserts every key of `lower` that `payload` does not already have
fn fill_missing(payload: &mut Document, lower: Document) {
    for (key, value) in lower {
        if !payload.contains_key(&key) {
            payload.insert(key, value);
        }
    }
}

fn operator_addresses(update: &Document, operator: &str, field: &str) -> bool {
    update
        .get_document(operator)
        .map_or(false, |fields| fields.contains_key(field))
}

fn touch_updated_at(mut update: Document, updated_at: &str) -> Document {
    if operator_addresses(&update, "$set", updated_at)
        || operator_addresses(&update, "$unset", updated_at)
    {
        return update;
    }
    match update.get_mut(CURRENT_DATE) {
        Some(Bson::Document(current)) => {
            if !current.contains_key(updated_at) {
                current.insert(updated_at, true);
            }
            update
        }
        Some(_) => update,
        None => {
            let mut current = Document::new();
            current.insert(updated_at, true);
            let mut touched = Document::new();
            touched.insert(CURRENT_DATE, current);
            touched.extend(update);
            touched
        }
    }
}

/// Paths written by every operator other than `$setOnInsert`
fn written_paths(update: &Document) -> Vec<String> {
    update
        .iter()
        .filter(|(operator, _)| operator.as_str() != SET_ON_INSERT)
        .filter_map(|(_, fields)| fields.as_document())
        .flat_map(|fields| fields.keys().cloned())
        .collect()
}

/// Two paths overlap when equal or when one is a dotted prefix of the other
fn paths_overlap(a: &str, b: &str) -> bool {
    a == b
        || b.strip_prefix(a).map_or(false, |rest| rest.starts_with('.'))
        || a.strip_prefix(b).map_or(false, |rest| rest.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const T: i64 = 1_700_000_000_000;

    fn policy(defaults: Defaults, timestamps: bool) -> MutationPolicy {
        MutationPolicy::from_parts(
            defaults,
            timestamps.then(TimestampFields::default),
            Arc::new(FixedClock::at_millis(T)),
        )
    }

    fn at_t() -> bson::DateTime {
        bson::DateTime::from_millis(T)
    }

    fn update_doc(update: UpdateModifications) -> Document {
        update.as_document().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_timestamps_are_defaults() {
        let policy = policy(Defaults::None, true);
        let payload = policy.insert_document(doc! { "foo": "x" }).await;
        assert_eq!(
            payload,
            doc! { "foo": "x", "createdAt": at_t(), "updatedAt": at_t() }
        );

        let earlier = bson::DateTime::from_millis(5);
        let payload = policy
            .insert_document(doc! { "createdAt": earlier, "updatedAt": earlier })
            .await;
        assert_eq!(payload, doc! { "createdAt": earlier, "updatedAt": earlier });
    }

    #[tokio::test]
    async fn test_insert_defaults_lose_to_document() {
        let policy = policy(doc! { "bar": 42 }.into(), false);
        assert_eq!(
            policy.insert_document(doc! { "foo": "a" }).await,
            doc! { "foo": "a", "bar": 42 }
        );
        assert_eq!(
            policy.insert_document(doc! { "foo": "a", "bar": 7 }).await,
            doc! { "foo": "a", "bar": 7 }
        );
    }

    #[tokio::test]
    async fn test_defaults_factory_runs_per_document() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let defaults = Defaults::from_fn(move || {
            doc! { "seq": counter.fetch_add(1, Ordering::SeqCst) as i64 }
        });
        let policy = policy(defaults, false);

        let payloads = policy
            .insert_documents(vec![doc! {}, doc! {}, doc! { "seq": 99_i64 }])
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(payloads[0], doc! { "seq": 0_i64 });
        assert_eq!(payloads[1], doc! { "seq": 1_i64 });
        assert_eq!(payloads[2], doc! { "seq": 99_i64 });

        policy.touch(doc! { "$set": { "a": 1 } }.into());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_touch_adds_current_date() {
        let policy = policy(Defaults::None, true);
        let update = update_doc(policy.touch(doc! { "$set": { "a": 1 } }.into()));
        assert_eq!(
            update,
            doc! { "$currentDate": { "updatedAt": true }, "$set": { "a": 1 } }
        );
        assert_eq!(update.keys().next().map(String::as_str), Some("$currentDate"));
    }

    #[test]
    fn test_touch_respects_explicit_updated_at() {
        let policy = policy(Defaults::None, true);
        let set = doc! { "$set": { "a": 1, "updatedAt": at_t() } };
        assert_eq!(update_doc(policy.touch(set.clone().into())), set);

        let unset = doc! { "$unset": { "updatedAt": 1 } };
        assert_eq!(update_doc(policy.touch(unset.clone().into())), unset);
    }

    #[test]
    fn test_touch_merges_into_existing_current_date() {
        let policy = policy(Defaults::None, true);
        let update = update_doc(policy.touch(doc! { "$currentDate": { "seen": true } }.into()));
        assert_eq!(
            update,
            doc! { "$currentDate": { "seen": true, "updatedAt": true } }
        );
    }

    #[test]
    fn test_touch_without_timestamps_is_identity() {
        let policy = policy(Defaults::None, false);
        let update = doc! { "$set": { "a": 1 } };
        assert_eq!(update_doc(policy.touch(update.clone().into())), update);
    }

    #[tokio::test]
    async fn test_upsert_bundle() {
        let policy = policy(doc! { "status": "new", "count": 0 }.into(), true);
        let update = update_doc(policy.upsert(doc! { "$set": { "name": "a" } }.into()).await);
        assert_eq!(
            update,
            doc! {
                "$currentDate": { "updatedAt": true },
                "$set": { "name": "a" },
                "$setOnInsert": { "status": "new", "count": 0, "createdAt": at_t() },
            }
        );
    }

    #[tokio::test]
    async fn test_upsert_drops_written_fields() {
        let policy = policy(
            doc! { "count": 0, "tags": [], "status": "new", "note": "", "profile": {} }.into(),
            true,
        );
        let update = update_doc(
            policy
                .upsert(
                    doc! {
                        "$inc": { "count": 1 },
                        "$push": { "tags": "a" },
                        "$set": { "status": "old", "profile.name": "x" },
                        "$unset": { "note": 1, "createdAt": 1 },
                    }
                    .into(),
                )
                .await,
        );
        assert!(update.get("$setOnInsert").is_none());
    }

    #[tokio::test]
    async fn test_upsert_caller_set_on_insert_wins_over_defaults() {
        let policy = policy(doc! { "status": "new" }.into(), false);
        let update = update_doc(
            policy
                .upsert(doc! { "$setOnInsert": { "status": "imported" } }.into())
                .await,
        );
        assert_eq!(update, doc! { "$setOnInsert": { "status": "imported" } });
    }

    #[tokio::test]
    async fn test_upsert_without_bundle_omits_set_on_insert() {
        let policy = policy(Defaults::None, false);
        let update = update_doc(policy.upsert(doc! { "$set": { "a": 1 } }.into()).await);
        assert_eq!(update, doc! { "$set": { "a": 1 } });
    }

    #[tokio::test]
    async fn test_pipeline_updates_pass_through() {
        let policy = policy(doc! { "a": 1 }.into(), true);
        let pipeline = UpdateModifications::Pipeline(vec![doc! { "$set": { "b": 2 } }]);
        assert_eq!(policy.touch(pipeline.clone()), pipeline);
        assert_eq!(policy.upsert(pipeline.clone()).await, pipeline);
    }

    #[test]
    fn test_replacement_gets_timestamps_only() {
        let policy = policy(doc! { "status": "new" }.into(), true);
        assert_eq!(
            policy.replacement(doc! { "name": "b" }),
            doc! { "name": "b", "createdAt": at_t(), "updatedAt": at_t() }
        );
    }

    #[test]
    fn test_custom_timestamp_names() {
        let policy = MutationPolicy::from_parts(
            Defaults::None,
            Some(TimestampFields {
                created_at: "_createdDate".into(),
                updated_at: "updatedAt".into(),
            }),
            Arc::new(FixedClock::at_millis(T)),
        );
        assert_eq!(
            policy.replacement(doc! {}),
            doc! { "_createdDate": at_t(), "updatedAt": at_t() }
        );
    }

    #[test]
    fn test_paths_overlap() {
        assert!(paths_overlap("a", "a"));
        assert!(paths_overlap("a", "a.b"));
        assert!(paths_overlap("a.b", "a"));
        assert!(!paths_overlap("a", "ab"));
    }
}
