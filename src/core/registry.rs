use std::{collections::HashMap, sync::Arc};

use crate::core::definition::{ApiDefinition, PrivateTable};

/// Loaded API definitions and private value stores, keyed by name.
///
/// Built once at startup and shared read-only between calls; the only
/// mutable state reachable from here is each definition's cache.
#[derive(Debug, Default)]
pub struct ApiRegistry {
    apis: HashMap<String, Arc<ApiDefinition>>,
    privates: HashMap<String, PrivateTable>,
}

impl ApiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition under its id, replacing any previous one.
    pub fn insert_api(&mut self, definition: ApiDefinition) {
        if self.apis.contains_key(&definition.id) {
            tracing::warn!("API definition '{}' registered twice, keeping the last one", definition.id);
        }
        self.apis
            .insert(definition.id.clone(), Arc::new(definition));
    }

    pub fn insert_privates(&mut self, scope: impl Into<String>, table: PrivateTable) {
        self.privates.insert(scope.into(), table);
    }

    pub fn get(&self, name: &str) -> Option<Arc<ApiDefinition>> {
        self.apis.get(name).cloned()
    }

    /// Private values the definition is allowed to read.
    pub fn privates_for(&self, definition: &ApiDefinition) -> Option<&PrivateTable> {
        let scope = definition.privates.as_deref()?;
        let table = self.privates.get(scope);
        if table.is_none() {
            tracing::warn!(
                "API '{}' references unknown private store '{}'",
                definition.id,
                scope
            );
        }
        table
    }

    pub fn api_ids(&self) -> impl Iterator<Item = &str> {
        self.apis.keys().map(String::as_str)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Arc<ApiDefinition>> {
        self.apis.values()
    }

    pub fn len(&self) -> usize {
        self.apis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }

    pub fn private_store_count(&self) -> usize {
        self.privates.len()
    }
}
