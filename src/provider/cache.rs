//! Process-lifetime cache of provider clients

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use super::{ProviderClient, ProviderConnector};
use crate::error::Result;

/// Lazily populated map from provider name to client
///
/// Clients are never evicted. A failed construction is not stored, so the
/// next lookup for that provider tries again.
pub struct ProviderClientCache {
    connector: Arc<dyn ProviderConnector>,
    clients: Mutex<HashMap<String, Arc<dyn ProviderClient>>>,
}

impl ProviderClientCache {
    /// Create an empty cache building clients with `connector`
    pub fn new(connector: Arc<dyn ProviderConnector>) -> Self {
        Self {
            connector,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Get the client for `provider`, creating it on first use
    pub fn get(&self, provider: &str) -> Result<Arc<dyn ProviderClient>> {
        // held across construction so concurrent workers build a client once
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(provider) {
            return Ok(Arc::clone(client));
        }

        let client = self.connector.connect(provider)?;
        clients.insert(provider.to_string(), Arc::clone(&client));
        info!(provider = %provider, "Created provider client");
        Ok(client)
    }

    /// Number of cached clients
    pub fn len(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no client has been created yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
