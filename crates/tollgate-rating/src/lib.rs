//! # Tollgate Rating
//!
//! The rating stage of the pipeline: pluggable [`RatingProcessor`] modules
//! attach prices to collected usage in place. Modules are resolved by name
//! from a registry, can be enabled/disabled at runtime, and run in descending
//! priority order through a [`RatingPipeline`].
//!
//! The pricing logic inside a module is deliberately out of scope here; the
//! stock modules are a flat per-service rate table and a pass-through.

pub mod flat;
pub mod noop;
pub mod pipeline;

use std::collections::HashMap;
use std::sync::Arc;

use tollgate_common::UsageFrame;

pub use flat::FlatRating;
pub use noop::NoopRating;
pub use pipeline::RatingPipeline;

/// A pluggable rating module.
///
/// `process` mutates the collected batch in place, attaching a price to each
/// usage item. `quote` does the same for a candidate batch that will never
/// reach storage. `nodata` is the hook invoked when a period produced no
/// usage for a service, so stateful modules can account for the gap.
pub trait RatingProcessor: Send + Sync {
    fn name(&self) -> &str;

    /// Modules run in descending priority order
    fn priority(&self) -> u32 {
        0
    }

    /// Price a candidate batch without touching storage
    fn quote(&self, frames: &mut [UsageFrame]) {
        self.process(frames);
    }

    /// Price collected frames in place
    fn process(&self, frames: &mut [UsageFrame]);

    /// Hook invoked when a period produced no usage for a service
    fn nodata(&self, _begin: i64, _end: i64) {}
}

type ProcessorCtor = Arc<dyn Fn() -> Arc<dyn RatingProcessor> + Send + Sync>;

struct RegistryEntry {
    ctor: ProcessorCtor,
    enabled: bool,
}

/// Registry of rating modules keyed by name, with an enabled flag per module.
///
/// The orchestrator owns the registry and rebuilds the pipeline whenever the
/// command endpoint toggles or reloads modules.
#[derive(Default)]
pub struct RatingRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl RatingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the stock modules registered and enabled
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("flat", true, || {
            Arc::new(FlatRating::default()) as Arc<dyn RatingProcessor>
        });
        registry.register("noop", true, || {
            Arc::new(NoopRating) as Arc<dyn RatingProcessor>
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, enabled: bool, ctor: F)
    where
        F: Fn() -> Arc<dyn RatingProcessor> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.into(),
            RegistryEntry {
                ctor: Arc::new(ctor),
                enabled,
            },
        );
    }

    /// Toggle a module; returns false when the module is unknown
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.entries.get(name).map(|e| e.enabled).unwrap_or(false)
    }

    /// Instantiate every enabled module into an ordered pipeline
    pub fn build_pipeline(&self) -> RatingPipeline {
        let processors = self
            .entries
            .values()
            .filter(|entry| entry.enabled)
            .map(|entry| (entry.ctor)())
            .collect();
        RatingPipeline::new(processors)
    }
}
