//! Source registry.

use crate::error::RegistryError;
use crate::source::SourceConfig;
use std::sync::Arc;

/// Ordered set of sources, unique by id.
///
/// Filled once at startup and only read afterwards; entries are shared with
/// poll tasks through `Arc`.
#[derive(Debug, Default, Clone)]
pub struct SourceRegistry {
    sources: Vec<Arc<SourceConfig>>,
}

impl SourceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configurations, in order.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateSource`] on the first repeated id.
    pub fn from_configs(
        configs: impl IntoIterator<Item = SourceConfig>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for config in configs {
            registry.register(config)?;
        }
        Ok(registry)
    }

    /// Add a source.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateSource`] if the id is already present;
    /// the registry is left unchanged.
    pub fn register(&mut self, config: SourceConfig) -> Result<(), RegistryError> {
        if self.get(&config.id).is_some() {
            return Err(RegistryError::DuplicateSource(config.id));
        }

        tracing::debug!(
            source = %config.id,
            kind = %config.kind,
            endpoint = %config.endpoint,
            "Registered source"
        );
        self.sources.push(Arc::new(config));
        Ok(())
    }

    /// Sources in registration order.
    #[must_use]
    pub fn list(&self) -> &[Arc<SourceConfig>] {
        &self.sources
    }

    /// Look a source up by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<SourceConfig>> {
        self.sources.iter().find(|source| source.id == id)
    }

    /// Number of registered sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether no source is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Endpoint, SourceKind};

    fn source(id: &str, kind: SourceKind) -> SourceConfig {
        SourceConfig::new(id, kind, Endpoint::parse("http://192.168.1.1").unwrap())
    }

    #[test]
    fn distinct_ids_register_in_order() {
        let mut registry = SourceRegistry::new();
        registry.register(source("bbox", SourceKind::BBox)).unwrap();
        registry
            .register(source("freebox", SourceKind::Freebox))
            .unwrap();
        registry.register(source("deye", SourceKind::Deye)).unwrap();

        let ids: Vec<&str> = registry.list().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["bbox", "freebox", "deye"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut registry = SourceRegistry::new();
        registry.register(source("bbox", SourceKind::BBox)).unwrap();

        let err = registry
            .register(source("bbox", SourceKind::Freebox))
            .unwrap_err();

        assert_eq!(err, RegistryError::DuplicateSource("bbox".to_string()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("bbox").unwrap().kind, SourceKind::BBox);
    }

    #[test]
    fn from_configs_stops_on_duplicate() {
        let result = SourceRegistry::from_configs([
            source("deye", SourceKind::Deye),
            source("deye", SourceKind::Deye),
        ]);
        assert!(matches!(result, Err(RegistryError::DuplicateSource(id)) if id == "deye"));
    }
}
