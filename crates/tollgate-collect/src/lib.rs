//! # Tollgate Collect
//!
//! Usage collection for the rating pipeline: the [`Collector`] capability
//! interface, metadata [`transformers`], and the name-keyed registry that
//! resolves the configured backend at startup.
//!
//! Collectors are thin adapters over a metering backend. The pipeline core
//! only depends on the trait; concrete adapters are registered by name and
//! validated against the transformer set before the orchestrator starts.

pub mod static_source;
pub mod transformers;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use tollgate_common::{CollectError, UsageItem};
use transformers::TransformerSet;

pub use static_source::StaticCollector;

/// A metering backend adapter.
///
/// `retrieve` returns the usage samples for one resource type over one
/// period window. The no-data outcome is a dedicated error variant so
/// callers cannot mistake it for success or for a backend failure.
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    /// Transformer names this collector requires; validated at startup.
    fn dependencies(&self) -> &[&str] {
        &[]
    }

    /// Fetch usage samples for `resource` over `[start, end)`.
    async fn retrieve(
        &self,
        resource: &str,
        start: i64,
        end: i64,
        tenant_id: &str,
    ) -> Result<Vec<UsageItem>, CollectError>;
}

/// Validate a collector's declared transformer dependencies.
///
/// A missing dependency is fatal at startup: the orchestrator must refuse to
/// run rather than silently collect unnormalized data.
pub fn check_dependencies(
    collector: &dyn Collector,
    transformers: &TransformerSet,
) -> Result<(), CollectError> {
    for dependency in collector.dependencies() {
        if !transformers.contains(dependency) {
            return Err(CollectError::MissingTransformer {
                collector: collector.name().to_string(),
                transformer: dependency.to_string(),
            });
        }
    }
    Ok(())
}

type CollectorCtor =
    Arc<dyn Fn(&TransformerSet) -> Result<Arc<dyn Collector>, CollectError> + Send + Sync>;

/// Registry mapping collector backend names to constructors.
///
/// Populated at process startup; call sites resolve the configured name and
/// only ever hold the [`Collector`] trait object.
#[derive(Default)]
pub struct CollectorRegistry {
    ctors: HashMap<String, CollectorCtor>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in collectors registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("static", |transformers| {
            Ok(Arc::new(StaticCollector::new(transformers.clone())) as Arc<dyn Collector>)
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn(&TransformerSet) -> Result<Arc<dyn Collector>, CollectError>
            + Send
            + Sync
            + 'static,
    {
        self.ctors.insert(name.into(), Arc::new(ctor));
    }

    /// Instantiate the named collector and validate its dependencies
    pub fn build(
        &self,
        name: &str,
        transformers: &TransformerSet,
    ) -> Result<Arc<dyn Collector>, CollectError> {
        let ctor = self
            .ctors
            .get(name)
            .ok_or_else(|| CollectError::UnknownBackend(name.to_string()))?;
        let collector = ctor(transformers)?;
        check_dependencies(collector.as_ref(), transformers)?;
        Ok(collector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeedyCollector;

    #[async_trait]
    impl Collector for NeedyCollector {
        fn name(&self) -> &str {
            "needy"
        }

        fn dependencies(&self) -> &[&str] {
            &["metadata", "missing"]
        }

        async fn retrieve(
            &self,
            resource: &str,
            _start: i64,
            _end: i64,
            _tenant_id: &str,
        ) -> Result<Vec<UsageItem>, CollectError> {
            Err(CollectError::no_data(self.name(), resource))
        }
    }

    #[test]
    fn test_missing_dependency_is_fatal() {
        let transformers = TransformerSet::with_defaults();
        let err = check_dependencies(&NeedyCollector, &transformers).unwrap_err();
        assert!(matches!(
            err,
            CollectError::MissingTransformer { ref transformer, .. } if transformer == "missing"
        ));
    }

    #[test]
    fn test_registry_resolves_static() {
        let transformers = TransformerSet::with_defaults();
        let registry = CollectorRegistry::with_defaults();
        let collector = registry.build("static", &transformers).unwrap();
        assert_eq!(collector.name(), "static");
    }

    #[test]
    fn test_registry_rejects_unknown_backend() {
        let transformers = TransformerSet::with_defaults();
        let registry = CollectorRegistry::with_defaults();
        let result = registry.build("ceilometer", &transformers);
        assert!(matches!(result, Err(CollectError::UnknownBackend(_))));
    }

    #[test]
    fn test_registry_validates_dependencies_on_build() {
        let transformers = TransformerSet::new();
        let mut registry = CollectorRegistry::new();
        registry.register("needy", |_| Ok(Arc::new(NeedyCollector) as Arc<dyn Collector>));
        let result = registry.build("needy", &transformers);
        assert!(matches!(result, Err(CollectError::MissingTransformer { .. })));
    }
}
