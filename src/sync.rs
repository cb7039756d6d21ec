//! Schema sync
//!
//! Installs a compiled schema's validator on the store. An absent
//! collection is created with the validator; an existing one is modified
//! in place. A write command is always issued, even when the installed
//! validator already matches; use [`is_validator_current`] to skip it.

use bson::doc;
use tracing::info;

use crate::schema::Schema;
use crate::store::{CollectionInfo, CreateCollectionOptions, Database, StoreResult};

/// What sync did to the collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Modified,
}

/// Pushes the schema's validator, validation action and level to the store.
pub async fn sync_schema(
    database: &dyn Database,
    collection: &str,
    schema: &Schema,
) -> StoreResult<SyncOutcome> {
    let validator = schema.descriptor().json_schema();
    let action = schema.options().validation_action;
    let level = schema.options().validation_level;

    let existing = database
        .list_collections(Some(collection.to_string()))
        .await?;

    if existing.iter().any(|info| info.name == collection) {
        database
            .run_command(doc! {
                "collMod": collection,
                "validator": validator,
                "validationAction": action.as_str(),
                "validationLevel": level.as_str(),
            })
            .await?;
        info!(
            collection,
            action = action.as_str(),
            level = level.as_str(),
            "validator modified"
        );
        Ok(SyncOutcome::Modified)
    } else {
        database
            .create_collection(
                collection.to_string(),
                CreateCollectionOptions {
                    validator,
                    validation_action: action,
                    validation_level: level,
                },
            )
            .await?;
        info!(
            collection,
            action = action.as_str(),
            level = level.as_str(),
            "collection created with validator"
        );
        Ok(SyncOutcome::Created)
    }
}

/// Whether the collection already carries exactly this schema's validator
/// and validation settings.
pub fn is_validator_current(info: &CollectionInfo, schema: &Schema) -> bool {
    info.validator.as_ref() == Some(&schema.descriptor().json_schema())
        && info.validation_action == schema.options().validation_action
        && info.validation_level == schema.options().validation_level
}
