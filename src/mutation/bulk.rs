//! Bulk write normalization
//!
//! Each operation is rewritten on its own and order is preserved:
//!
//! | Operation                 | Rewrite                                    |
//! |---------------------------|--------------------------------------------|
//! | `insertOne`               | insert merge (timestamps, defaults, doc)   |
//! | `updateOne`/`updateMany`  | `$currentDate` touch, `$setOnInsert` on upsert |
//! | `replaceOne`              | timestamps under the replacement           |
//! | `deleteOne`/`deleteMany`  | unchanged                                  |
//!
//! Pipeline updates are left as they are.

use super::MutationPolicy;
use crate::store::WriteModel;

impl MutationPolicy {
    /// Rewrites every operation of a bulk write
    pub async fn bulk_write(&self, operations: Vec<WriteModel>) -> Vec<WriteModel> {
        let mut normalized = Vec::with_capacity(operations.len());
        for operation in operations {
            normalized.push(self.write_model(operation).await);
        }
        normalized
    }

    async fn write_model(&self, operation: WriteModel) -> WriteModel {
        match operation {
            WriteModel::InsertOne { document } => WriteModel::InsertOne {
                document: self.insert_document(document).await,
            },
            WriteModel::UpdateOne {
                filter,
                update,
                upsert,
            } => WriteModel::UpdateOne {
                filter,
                update: self.update(update, upsert).await,
                upsert,
            },
            WriteModel::UpdateMany {
                filter,
                update,
                upsert,
            } => WriteModel::UpdateMany {
                filter,
                update: self.update(update, upsert).await,
                upsert,
            },
            WriteModel::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => WriteModel::ReplaceOne {
                filter,
                replacement: self.replacement(replacement),
                upsert,
            },
            delete @ (WriteModel::DeleteOne { .. } | WriteModel::DeleteMany { .. }) => delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bson::doc;

    use super::*;
    use crate::mutation::FixedClock;
    use crate::schema::{Defaults, TimestampFields};
    use crate::store::UpdateModifications;

    const T: i64 = 1_000;

    fn timestamped(defaults: Defaults) -> MutationPolicy {
        MutationPolicy::from_parts(
            defaults,
            Some(TimestampFields::default()),
            Arc::new(FixedClock::at_millis(T)),
        )
    }

    #[tokio::test]
    async fn test_mixed_operations_keep_order() {
        let policy = timestamped(doc! { "status": "new" }.into());
        let now = bson::DateTime::from_millis(T);

        let normalized = policy
            .bulk_write(vec![
                WriteModel::insert_one(doc! { "name": "a" }),
                WriteModel::update_one(doc! { "name": "a" }, doc! { "$set": { "x": 1 } }),
                WriteModel::update_many(doc! {}, doc! { "$set": { "y": 1 } }).upsert(),
                WriteModel::replace_one(doc! { "name": "a" }, doc! { "name": "b" }),
                WriteModel::delete_one(doc! { "name": "b" }),
                WriteModel::delete_many(doc! {}),
            ])
            .await;

        assert_eq!(
            normalized,
            vec![
                WriteModel::insert_one(doc! {
                    "name": "a",
                    "status": "new",
                    "createdAt": now,
                    "updatedAt": now,
                }),
                WriteModel::update_one(
                    doc! { "name": "a" },
                    doc! { "$currentDate": { "updatedAt": true }, "$set": { "x": 1 } },
                ),
                WriteModel::update_many(
                    doc! {},
                    doc! {
                        "$currentDate": { "updatedAt": true },
                        "$set": { "y": 1 },
                        "$setOnInsert": { "status": "new", "createdAt": now },
                    },
                )
                .upsert(),
                WriteModel::replace_one(
                    doc! { "name": "a" },
                    doc! { "name": "b", "createdAt": now, "updatedAt": now },
                ),
                WriteModel::delete_one(doc! { "name": "b" }),
                WriteModel::delete_many(doc! {}),
            ]
        );
    }

    #[tokio::test]
    async fn test_unset_created_at_is_not_defaulted() {
        let policy = timestamped(Defaults::None);
        let normalized = policy
            .bulk_write(vec![WriteModel::update_many(
                doc! {},
                doc! { "$unset": { "createdAt": 1 } },
            )
            .upsert()])
            .await;

        match &normalized[0] {
            WriteModel::UpdateMany { update, .. } => {
                let update = update.as_document().unwrap();
                assert!(update.get("$setOnInsert").is_none());
                assert!(update.get("$currentDate").is_some());
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pipeline_update_untouched() {
        let policy = timestamped(doc! { "a": 1 }.into());
        let pipeline = UpdateModifications::Pipeline(vec![doc! { "$set": { "b": 1 } }]);
        let op = WriteModel::UpdateOne {
            filter: doc! {},
            update: pipeline,
            upsert: true,
        };
        assert_eq!(policy.bulk_write(vec![op.clone()]).await, vec![op]);
    }
}
