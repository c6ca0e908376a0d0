//! Shared application state handed to every axum handler.

use std::sync::Arc;

use orchestrator_core::config::Config;
use orchestrator_core::crypto::KeyEncryptionKey;
use orchestrator_core::db::Store;
use orchestrator_core::orchestrator::Orchestrator;
use orchestrator_core::provider::registry::AdapterRegistry;
use orchestrator_core::wait_coordinator::AsyncWaitCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub orchestrator: Arc<Orchestrator>,
    pub wait_coordinator: Arc<AsyncWaitCoordinator>,
    pub adapters: AdapterRegistry,
    pub config: Arc<Config>,
    pub kek: Arc<KeyEncryptionKey>,
}
