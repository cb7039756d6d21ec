//! Model registry
//!
//! Owns the models of one application and the database they are bound to.
//! Models registered before [`ModelRegistry::connect`] are bound when it
//! runs; models registered afterwards are bound immediately.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use super::errors::{ModelError, ModelResult};
use super::{Model, ModelOptions};
use crate::schema::Schema;
use crate::store::Database;
use crate::sync::{sync_schema, SyncOutcome};

#[derive(Default)]
struct RegistryState {
    models: BTreeMap<String, Arc<Model>>,
    database: Option<Arc<dyn Database>>,
}

/// Registered models and their shared database
#[derive(Default)]
pub struct ModelRegistry {
    state: RwLock<RegistryState>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ModelRegistry")
            .field("models", &state.models.keys().collect::<Vec<_>>())
            .field("connected", &state.database.is_some())
            .finish()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model under `name`, replacing any previous one.
    pub fn register(
        &self,
        name: impl Into<String>,
        schema: Schema,
        options: ModelOptions,
    ) -> Arc<Model> {
        let model = Arc::new(Model::new(name, schema, options));
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(database) = &state.database {
            model.bind(database.as_ref());
        }
        state
            .models
            .insert(model.name().to_string(), Arc::clone(&model));
        model
    }

    /// Binds every registered model to `database`. Connecting again keeps
    /// already bound models on their original database.
    pub fn connect(&self, database: Arc<dyn Database>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        for model in state.models.values() {
            model.bind(database.as_ref());
        }
        info!(
            database = database.name(),
            models = state.models.len(),
            "registry connected"
        );
        state.database = Some(database);
    }

    pub fn is_connected(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .database
            .is_some()
    }

    pub fn model(&self, name: &str) -> Option<Arc<Model>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .models
            .get(name)
            .cloned()
    }

    /// Registered model names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .models
            .keys()
            .cloned()
            .collect()
    }

    fn database(&self) -> Option<Arc<dyn Database>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .database
            .clone()
    }

    /// Runs schema sync for one registered model.
    pub async fn update_schema(&self, name: &str) -> ModelResult<SyncOutcome> {
        let model = self
            .model(name)
            .ok_or_else(|| ModelError::UnknownModel(name.to_string()))?;
        let database = self
            .database()
            .ok_or_else(|| ModelError::NotInitialized(name.to_string()))?;
        Ok(sync_schema(database.as_ref(), model.name(), model.schema()).await?)
    }

    /// Runs schema sync for every registered model, in name order.
    pub async fn update_schemas(&self) -> ModelResult<Vec<(String, SyncOutcome)>> {
        let mut outcomes = Vec::new();
        for name in self.names() {
            let outcome = self.update_schema(&name).await?;
            outcomes.push((name, outcome));
        }
        Ok(outcomes)
    }
}
