use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

use super::backend::InferenceEngine;
use super::backends::StubEngine;

type EngineFactory = Box<dyn Fn() -> Box<dyn InferenceEngine> + Send + Sync>;

/// Parsed model reference: `"<backend>"` or `"<backend>:<model path>"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelReference {
    pub backend: String,
    pub path: PathBuf,
}

impl ModelReference {
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(anyhow!("model reference must not be empty"));
        }
        let (backend, path) = match reference.split_once(':') {
            Some((backend, path)) => (backend, path),
            None => (reference, ""),
        };
        if backend.is_empty() {
            return Err(anyhow!("model reference '{}' has no backend", reference));
        }
        Ok(Self {
            backend: backend.to_lowercase(),
            path: PathBuf::from(path),
        })
    }
}

/// Registry of inference engine factories.
///
/// Every worker thread gets its own engine instance, so the registry stores constructors
/// rather than shared engines.
pub struct EngineRegistry {
    factories: HashMap<String, EngineFactory>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with every backend compiled into this build.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("stub", || Box::new(StubEngine::new()));
        #[cfg(feature = "backend-tract")]
        registry.register("tract", || {
            Box::new(super::backends::TractEngine::new(640, 640))
        });
        registry
    }

    /// Register a backend factory, replacing any previous one of the same name.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn InferenceEngine> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.to_lowercase(), Box::new(factory));
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build and load one engine for `reference`.
    pub fn instantiate(&self, reference: &ModelReference) -> Result<Box<dyn InferenceEngine>> {
        let factory = self.factories.get(&reference.backend).ok_or_else(|| {
            anyhow!(
                "backend '{}' not registered (available: {})",
                reference.backend,
                self.list().join(", ")
            )
        })?;
        let mut engine = factory();
        engine.load(&reference.path).with_context(|| {
            format!(
                "{} engine failed to load {}",
                engine.name(),
                reference.path.display()
            )
        })?;
        Ok(engine)
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
