//! Versioned agent registry.
//!
//! Handlers are stored under the normalized key `id@version` (default
//! version `v1`). Lookups are O(1) and a successful registration is visible
//! to every subsequent lookup; the map lives behind a single `RwLock`.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::error::RegistryError;
use super::types::AgentHandler;

pub const DEFAULT_VERSION: &str = "v1";

/// Builds the normalized `id@version` key.
pub fn versioned_id(agent_id: &str, version: &str) -> String {
    let version = if version.is_empty() {
        DEFAULT_VERSION
    } else {
        version
    };
    format!("{agent_id}@{version}")
}

/// Concurrent map from `agent_id@version` to handler.
#[derive(Default)]
pub struct Registry {
    agents: RwLock<HashMap<String, Arc<dyn AgentHandler>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under the default version.
    pub fn register(
        &self,
        agent_id: &str,
        handler: impl AgentHandler + 'static,
    ) -> Result<(), RegistryError> {
        self.register_version(agent_id, DEFAULT_VERSION, handler)
    }

    /// Registers a handler under `id@version`; an empty version normalizes
    /// to `v1`. Re-binding an existing key is rejected.
    pub fn register_version(
        &self,
        agent_id: &str,
        version: &str,
        handler: impl AgentHandler + 'static,
    ) -> Result<(), RegistryError> {
        if agent_id.is_empty() {
            return Err(RegistryError::EmptyAgentId);
        }
        let key = versioned_id(agent_id, version);

        let mut agents = self.agents.write();
        if agents.contains_key(&key) {
            return Err(RegistryError::DuplicateAgentId(key));
        }
        agents.insert(key, Arc::new(handler));
        Ok(())
    }

    /// Looks up `id` or `id@version`; a bare id resolves to `v1`.
    pub fn get(&self, agent_id: &str) -> Option<Arc<dyn AgentHandler>> {
        match agent_id.split_once('@') {
            Some((id, version)) => self.get_version(id, version),
            None => self.get_version(agent_id, DEFAULT_VERSION),
        }
    }

    pub fn get_version(&self, agent_id: &str, version: &str) -> Option<Arc<dyn AgentHandler>> {
        let key = versioned_id(agent_id, version);
        self.agents.read().get(&key).cloned()
    }
}
