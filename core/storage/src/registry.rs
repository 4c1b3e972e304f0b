//! Provider registry for resolving endpoints by name.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use mirrorsync_common::{Error, Result};

use crate::local::LocalFs;
use crate::provider::Connect;

/// Factory function type for creating endpoint connectors.
pub type ConnectorFactory = Box<dyn Fn(Value) -> Result<Arc<dyn Connect>> + Send + Sync>;

/// Registry for remote filesystem factories.
///
/// Allows dynamic registration and resolution of providers by name and
/// configuration.
pub struct ProviderRegistry {
    factories: HashMap<String, ConnectorFactory>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a provider factory.
    ///
    /// # Preconditions
    /// - `name` must be unique within the registry
    ///
    /// # Postconditions
    /// - Factory is registered and can be resolved by name
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: ConnectorFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Provider '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a connector by provider name and configuration.
    ///
    /// # Preconditions
    /// - Provider must be registered
    /// - Configuration must be valid for the provider
    ///
    /// # Postconditions
    /// - Returns a connector; no connection is opened yet
    ///
    /// # Errors
    /// - Provider not found
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn Connect>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Provider '{}' is not registered", name)))?;
        factory(config)
    }

    /// Get list of registered provider names, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a provider is registered.
    pub fn has_provider(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn local_factory(config: Value) -> Result<Arc<dyn Connect>> {
    let root = config
        .get("root")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidInput("Local provider requires 'root' path".to_string()))?;
    let digest = config.get("digest").and_then(|v| v.as_bool()).unwrap_or(true);
    Ok(Arc::new(LocalFs::new(root)?.with_digest_support(digest)))
}

/// Create a registry with the bundled persistent providers (`local`).
///
/// `MemoryFs` is not registered: every resolve would hand out a fresh, empty
/// tree that disappears with the process.
pub fn create_default_registry() -> ProviderRegistry {
    let mut factories: HashMap<String, ConnectorFactory> = HashMap::new();
    factories.insert("local".to_string(), Box::new(local_factory));
    ProviderRegistry { factories }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFs;
    use serde_json::json;
    use tempfile::TempDir;

    fn memory_factory(config: Value) -> Result<Arc<dyn Connect>> {
        let digest = config.get("digest").and_then(|v| v.as_bool()).unwrap_or(true);
        Ok(Arc::new(MemoryFs::new().with_digest_support(digest)))
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let mut registry = ProviderRegistry::new();

        registry
            .register("test", Box::new(memory_factory))
            .unwrap();

        let connector = registry.resolve("test", Value::Null).unwrap();
        let conn = connector.connect().await.unwrap();
        assert_eq!(conn.name(), "memory");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ProviderRegistry::new();

        registry
            .register("test", Box::new(memory_factory))
            .unwrap();

        let result = registry.register("test", Box::new(memory_factory));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = ProviderRegistry::new();
        let result = registry.resolve("unknown", Value::Null);
        assert!(result.is_err());
    }

    #[test]
    fn test_default_registry() {
        let registry = create_default_registry();
        assert_eq!(registry.providers(), vec!["local"]);
        assert!(registry.has_provider("local"));
        assert!(registry.resolve("memory", Value::Null).is_err());
    }

    #[tokio::test]
    async fn test_local_requires_root() {
        let registry = create_default_registry();
        assert!(registry.resolve("local", json!({})).is_err());

        let temp = TempDir::new().unwrap();
        let connector = registry
            .resolve(
                "local",
                json!({ "root": temp.path().to_str().unwrap(), "digest": false }),
            )
            .unwrap();
        let conn = connector.connect().await.unwrap();
        assert_eq!(conn.name(), "local");
    }
}
