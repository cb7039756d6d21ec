//! Write operation shapes
//!
//! An update is either an operator document (`{$set: ...}`) or an
//! aggregation pipeline. A bulk write is an ordered list of [`WriteModel`]s.

use bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};

/// The update half of an update call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpdateModifications {
    /// Operator document
    Document(Document),
    /// Aggregation pipeline; opaque to timestamp and defaults handling
    Pipeline(Vec<Document>),
}

impl UpdateModifications {
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            UpdateModifications::Document(update) => Some(update),
            UpdateModifications::Pipeline(_) => None,
        }
    }

    pub fn is_pipeline(&self) -> bool {
        matches!(self, UpdateModifications::Pipeline(_))
    }
}

impl From<Document> for UpdateModifications {
    fn from(update: Document) -> Self {
        UpdateModifications::Document(update)
    }
}

impl From<Vec<Document>> for UpdateModifications {
    fn from(pipeline: Vec<Document>) -> Self {
        UpdateModifications::Pipeline(pipeline)
    }
}

impl From<UpdateModifications> for Bson {
    fn from(update: UpdateModifications) -> Self {
        match update {
            UpdateModifications::Document(update) => Bson::Document(update),
            UpdateModifications::Pipeline(stages) => {
                Bson::Array(stages.into_iter().map(Bson::Document).collect())
            }
        }
    }
}

/// One operation of a bulk write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteModel {
    InsertOne {
        document: Document,
    },
    UpdateOne {
        filter: Document,
        update: UpdateModifications,
        #[serde(default)]
        upsert: bool,
    },
    UpdateMany {
        filter: Document,
        update: UpdateModifications,
        #[serde(default)]
        upsert: bool,
    },
    ReplaceOne {
        filter: Document,
        replacement: Document,
        #[serde(default)]
        upsert: bool,
    },
    DeleteOne {
        filter: Document,
    },
    DeleteMany {
        filter: Document,
    },
}

impl WriteModel {
    pub fn insert_one(document: Document) -> Self {
        WriteModel::InsertOne { document }
    }

    pub fn update_one(filter: Document, update: impl Into<UpdateModifications>) -> Self {
        WriteModel::UpdateOne {
            filter,
            update: update.into(),
            upsert: false,
        }
    }

    pub fn update_many(filter: Document, update: impl Into<UpdateModifications>) -> Self {
        WriteModel::UpdateMany {
            filter,
            update: update.into(),
            upsert: false,
        }
    }

    pub fn replace_one(filter: Document, replacement: Document) -> Self {
        WriteModel::ReplaceOne {
            filter,
            replacement,
            upsert: false,
        }
    }

    pub fn delete_one(filter: Document) -> Self {
        WriteModel::DeleteOne { filter }
    }

    pub fn delete_many(filter: Document) -> Self {
        WriteModel::DeleteMany { filter }
    }

    /// Sets the upsert flag on update and replace operations
    pub fn upsert(mut self) -> Self {
        match &mut self {
            WriteModel::UpdateOne { upsert, .. }
            | WriteModel::UpdateMany { upsert, .. }
            | WriteModel::ReplaceOne { upsert, .. } => *upsert = true,
            _ => {}
        }
        self
    }

    /// Operation name as the store spells it
    pub fn name(&self) -> &'static str {
        match self {
            WriteModel::InsertOne { .. } => "insertOne",
            WriteModel::UpdateOne { .. } => "updateOne",
            WriteModel::UpdateMany { .. } => "updateMany",
            WriteModel::ReplaceOne { .. } => "replaceOne",
            WriteModel::DeleteOne { .. } => "deleteOne",
            WriteModel::DeleteMany { .. } => "deleteMany",
        }
    }

    /// Wire shape: `{ <name>: { ...fields } }`
    pub fn to_document(&self) -> Document {
        let body = match self {
            WriteModel::InsertOne { document } => doc! { "document": document.clone() },
            WriteModel::UpdateOne {
                filter,
                update,
                upsert,
            }
            | WriteModel::UpdateMany {
                filter,
                update,
                upsert,
            } => doc! {
                "filter": filter.clone(),
                "update": Bson::from(update.clone()),
                "upsert": *upsert,
            },
            WriteModel::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => doc! {
                "filter": filter.clone(),
                "replacement": replacement.clone(),
                "upsert": *upsert,
            },
            WriteModel::DeleteOne { filter } | WriteModel::DeleteMany { filter } => {
                doc! { "filter": filter.clone() }
            }
        };
        let mut wire = Document::new();
        wire.insert(self.name(), body);
        wire
    }
}
