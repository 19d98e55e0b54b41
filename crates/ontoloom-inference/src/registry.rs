//! Embedder registry with scoped handles.
//!
//! Embedders can hold large resources (HTTP pools, local model weights), so
//! the registry shares one live instance per embedder name. The registry
//! itself only keeps weak references: when the last [`EmbedderHandle`] is
//! dropped the embedder is released, and the next `acquire` builds a fresh
//! one.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use ontoloom_core::{EmbeddingBackend, Result};

use crate::config::EmbedderConfig;

type Factory = dyn Fn(&EmbedderConfig) -> Result<Arc<dyn EmbeddingBackend>> + Send + Sync;

/// Shares live embedders by name.
pub struct EmbedderRegistry {
    factory: Box<Factory>,
    live: Mutex<HashMap<String, Weak<dyn EmbeddingBackend>>>,
}

impl EmbedderRegistry {
    /// Registry building embedders from their backend configuration.
    pub fn new() -> Self {
        Self::with_factory(|config| config.backend.build_embedder())
    }

    /// Registry with a custom build function.
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn(&EmbedderConfig) -> Result<Arc<dyn EmbeddingBackend>> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Get a handle to the embedder named by `config`, building it if no
    /// live instance exists.
    pub fn acquire(&self, config: &EmbedderConfig) -> Result<EmbedderHandle> {
        let mut live = self.live.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(backend) = live.get(&config.name).and_then(Weak::upgrade) {
            debug!(subsystem = "inference", component = "registry", embedder = %config.name, "Reusing live embedder");
            return Ok(EmbedderHandle {
                name: config.name.clone(),
                backend,
            });
        }

        let backend = (self.factory)(config)?;
        live.insert(config.name.clone(), Arc::downgrade(&backend));
        debug!(subsystem = "inference", component = "registry", embedder = %config.name, "Built embedder");
        Ok(EmbedderHandle {
            name: config.name.clone(),
            backend,
        })
    }

    /// Number of embedders with at least one live handle.
    pub fn active_count(&self) -> usize {
        let mut live = self.live.lock().unwrap_or_else(|p| p.into_inner());
        live.retain(|_, weak| weak.strong_count() > 0);
        live.len()
    }
}

impl Default for EmbedderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped access to a shared embedder; releases its share on drop.
#[derive(Clone)]
pub struct EmbedderHandle {
    name: String,
    backend: Arc<dyn EmbeddingBackend>,
}

impl EmbedderHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> Arc<dyn EmbeddingBackend> {
        Arc::clone(&self.backend)
    }
}

impl Deref for EmbedderHandle {
    type Target = dyn EmbeddingBackend;

    fn deref(&self) -> &Self::Target {
        self.backend.as_ref()
    }
}

impl Drop for EmbedderHandle {
    fn drop(&mut self) {
        debug!(subsystem = "inference", component = "registry", embedder = %self.name, "Embedder handle released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, MockBackendConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn mock_config(name: &str) -> EmbedderConfig {
        EmbedderConfig {
            name: name.to_string(),
            backend: BackendConfig::Mock(MockBackendConfig {
                dimension: 4,
                ..Default::default()
            }),
        }
    }

    fn counting_registry() -> (EmbedderRegistry, Arc<AtomicUsize>) {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let registry = EmbedderRegistry::with_factory(move |config| {
            counter.fetch_add(1, Ordering::SeqCst);
            config.backend.build_embedder()
        });
        (registry, builds)
    }

    #[test]
    fn test_live_embedder_is_shared() {
        let (registry, builds) = counting_registry();
        let a = registry.acquire(&mock_config("mini")).unwrap();
        let b = registry.acquire(&mock_config("mini")).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(a.dimension(), 4);
        assert_eq!(b.name(), "mini");
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_dropped_handles_release_embedder() {
        let (registry, builds) = counting_registry();
        {
            let _h = registry.acquire(&mock_config("mini")).unwrap();
            assert_eq!(registry.active_count(), 1);
        }
        assert_eq!(registry.active_count(), 0);
        let _h = registry.acquire(&mock_config("mini")).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_distinct_names_build_distinct_embedders() {
        let (registry, builds) = counting_registry();
        let _a = registry.acquire(&mock_config("a")).unwrap();
        let _b = registry.acquire(&mock_config("b")).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(registry.active_count(), 2);
    }
}
