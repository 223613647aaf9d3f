//! Tenant discovery

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use tollgate_common::config::FetcherSettings;
use tollgate_common::{Result, TollgateError};

/// Source of the tenant list the orchestrator iterates over
#[async_trait]
pub trait TenantFetcher: Send + Sync {
    async fn get_tenants(&self) -> Result<Vec<String>>;
}

/// Serves the tenant list from configuration
pub struct StaticFetcher {
    tenants: Vec<String>,
}

impl StaticFetcher {
    pub fn new(tenants: Vec<String>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl TenantFetcher for StaticFetcher {
    async fn get_tenants(&self) -> Result<Vec<String>> {
        Ok(self.tenants.clone())
    }
}

type FetcherCtor =
    Arc<dyn Fn(&FetcherSettings) -> Result<Arc<dyn TenantFetcher>> + Send + Sync>;

/// Registry mapping fetcher backend names to constructors
#[derive(Default)]
pub struct FetcherRegistry {
    ctors: HashMap<String, FetcherCtor>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("static", |settings| {
            Ok(Arc::new(StaticFetcher::new(settings.tenants.clone())) as Arc<dyn TenantFetcher>)
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn(&FetcherSettings) -> Result<Arc<dyn TenantFetcher>> + Send + Sync + 'static,
    {
        self.ctors.insert(name.into(), Arc::new(ctor));
    }

    pub fn build(&self, settings: &FetcherSettings) -> Result<Arc<dyn TenantFetcher>> {
        let ctor = self.ctors.get(&settings.backend).ok_or_else(|| {
            TollgateError::Config(format!("unknown fetcher backend '{}'", settings.backend))
        })?;
        ctor(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_fetcher_round_trip() {
        let settings = FetcherSettings {
            backend: "static".to_string(),
            tenants: vec!["tenant-1".to_string(), "tenant-2".to_string()],
        };
        let fetcher = FetcherRegistry::with_defaults().build(&settings).unwrap();
        assert_eq!(
            fetcher.get_tenants().await.unwrap(),
            vec!["tenant-1", "tenant-2"]
        );
    }

    #[test]
    fn test_unknown_fetcher_backend() {
        let settings = FetcherSettings {
            backend: "keystone".to_string(),
            tenants: Vec::new(),
        };
        assert!(FetcherRegistry::with_defaults().build(&settings).is_err());
    }
}
