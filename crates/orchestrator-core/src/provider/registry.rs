//! Provider-adapter registry.
//!
//! The source keys adapter selection off `(operation, params.modelId)` via a
//! model registry. Expressed here as a plain lookup table keyed by
//! `(operation, Option<model_id>)`, with a `None` model id acting as the
//! operation's default adapter — a tagged-variant registry rather than the
//! source's class-style dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use super::ProviderAdapter;

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<(String, Option<String>), Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter for `operation`. `model_id = None` registers it
    /// as that operation's default.
    pub fn register(
        &mut self,
        operation: impl Into<String>,
        model_id: Option<&str>,
        adapter: Arc<dyn ProviderAdapter>,
    ) {
        self.adapters
            .insert((operation.into(), model_id.map(|s| s.to_string())), adapter);
    }

    /// Look up the adapter for an operation + optional `modelId` param.
    /// Falls back to the operation's default (`model_id = None`) adapter if
    /// a specific model wasn't registered.
    pub fn get(&self, operation: &str, model_id: Option<&str>) -> Option<Arc<dyn ProviderAdapter>> {
        if let Some(model_id) = model_id {
            if let Some(adapter) = self
                .adapters
                .get(&(operation.to_string(), Some(model_id.to_string())))
            {
                return Some(adapter.clone());
            }
        }
        self.adapters
            .get(&(operation.to_string(), None))
            .cloned()
    }

    /// Whether at least one adapter (default or model-specific) is
    /// registered for `operation`. Used by plan admission to reject jobs
    /// whose operation kind has no supported adapter.
    pub fn knows_operation(&self, operation: &str) -> bool {
        self.adapters.keys().any(|(op, _)| op == operation)
    }
}
