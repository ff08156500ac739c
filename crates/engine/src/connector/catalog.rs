//! Registry of catalog connectors keyed by service name.

use std::collections::HashMap;
use std::sync::Arc;

use super::builtin::{HttpConnector, WebhookConnector};
use super::{ActionInfo, Connector};

/// Connectors known to the engine.
///
/// The catalog is built before the invoker is constructed and then shared
/// read-only across runs.
#[derive(Default, Clone)]
pub struct ConnectorCatalog {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl std::fmt::Debug for ConnectorCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorCatalog").field("services", &self.services()).finish()
    }
}

impl ConnectorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the built-in `http` and `webhook` connectors.
    pub fn with_builtins(client: reqwest::Client) -> Self {
        let mut catalog = Self::new();
        catalog.register(Arc::new(HttpConnector::new(client.clone())));
        catalog.register(Arc::new(WebhookConnector::new(client)));
        catalog
    }

    /// Adds a connector, replacing any previous one for the same service.
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.insert(connector.service().to_string(), connector);
    }

    pub fn contains(&self, service: &str) -> bool {
        self.connectors.contains_key(service)
    }

    pub fn get(&self, service: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(service).cloned()
    }

    /// Registered service names, sorted.
    pub fn services(&self) -> Vec<String> {
        let mut services: Vec<String> = self.connectors.keys().cloned().collect();
        services.sort();
        services
    }

    pub fn actions(&self, service: &str) -> Option<Vec<ActionInfo>> {
        self.connectors.get(service).map(|connector| connector.actions())
    }
}
