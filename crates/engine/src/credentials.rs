//! Globally configured service credentials shared by every run.

use std::sync::Arc;

use conduit_types::{CredentialMap, ServiceCredentials};

/// Read-only credential store. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct CredentialStore {
    global: Arc<CredentialMap>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut services: Vec<&String> = self.global.keys().collect();
        services.sort();
        f.debug_struct("CredentialStore").field("services", &services).finish()
    }
}

impl CredentialStore {
    pub fn new(global: CredentialMap) -> Self {
        Self { global: Arc::new(global) }
    }

    pub fn contains(&self, service: &str) -> bool {
        self.global.contains_key(service)
    }

    /// Credentials for `service`.
    ///
    /// Run-supplied credentials replace the global entry for that service as a
    /// whole; fields are not merged. An empty run entry counts as absent.
    pub fn resolve(&self, service: &str, run_credentials: Option<&ServiceCredentials>) -> ServiceCredentials {
        run_credentials
            .filter(|credentials| !credentials.is_empty())
            .or_else(|| self.global.get(service))
            .cloned()
            .unwrap_or_default()
    }
}
