//! Service configuration
//!
//! Settings are plain structs with defaults, overridable from `.env` and
//! `TOLLGATE_*` environment variables.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TollgateError};
use crate::{DEFAULT_PERIOD_SECS, DEFAULT_WAIT_PERIODS};

/// Top-level service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub collect: CollectSettings,
    pub storage: StorageSettings,
    pub orchestrator: OrchestratorSettings,
    pub fetcher: FetcherSettings,
}

/// Collection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectSettings {
    /// Rating period length in seconds
    pub period: i64,
    /// Number of settling periods to wait before collecting a period
    pub wait_periods: i64,
    /// Resource types collected each period, in order
    pub services: Vec<String>,
    /// Collector backend name
    pub collector: String,
}

impl Default for CollectSettings {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD_SECS,
            wait_periods: DEFAULT_WAIT_PERIODS,
            services: vec![
                "compute".to_string(),
                "image".to_string(),
                "volume".to_string(),
                "network.bw.in".to_string(),
                "network.bw.out".to_string(),
                "network.floating".to_string(),
                "cloudstorage".to_string(),
            ],
            collector: "static".to_string(),
        }
    }
}

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Storage backend name
    pub backend: String,
    /// Redis connection URL, used by the redis backend
    pub redis_url: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
        }
    }
}

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Coordination backend URL (`redis://...` or `memory://...`)
    pub coordination_url: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            coordination_url: "memory://local".to_string(),
        }
    }
}

/// Tenant fetcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherSettings {
    /// Fetcher backend name
    pub backend: String,
    /// Tenant list served by the static fetcher
    pub tenants: Vec<String>,
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            backend: "static".to_string(),
            tenants: Vec::new(),
        }
    }
}

impl Settings {
    /// Load configuration from environment and `.env`
    pub fn load() -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        let mut cfg = Self::default();

        if let Ok(val) = std::env::var("TOLLGATE_COLLECT_PERIOD") {
            if let Ok(v) = val.parse() {
                cfg.collect.period = v;
            }
        }
        if let Ok(val) = std::env::var("TOLLGATE_COLLECT_WAIT_PERIODS") {
            if let Ok(v) = val.parse() {
                cfg.collect.wait_periods = v;
            }
        }
        if let Ok(val) = std::env::var("TOLLGATE_COLLECT_SERVICES") {
            cfg.collect.services = parse_list(&val);
        }
        if let Ok(val) = std::env::var("TOLLGATE_COLLECT_COLLECTOR") {
            cfg.collect.collector = val;
        }

        if let Ok(val) = std::env::var("TOLLGATE_STORAGE_BACKEND") {
            cfg.storage.backend = val;
        }
        if let Ok(val) = std::env::var("TOLLGATE_STORAGE_REDIS_URL") {
            cfg.storage.redis_url = val;
        }

        if let Ok(val) = std::env::var("TOLLGATE_COORDINATION_URL") {
            cfg.orchestrator.coordination_url = val;
        }

        if let Ok(val) = std::env::var("TOLLGATE_FETCHER_BACKEND") {
            cfg.fetcher.backend = val;
        }
        if let Ok(val) = std::env::var("TOLLGATE_FETCHER_TENANTS") {
            cfg.fetcher.tenants = parse_list(&val);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.collect.period <= 0 {
            return Err(TollgateError::Config(format!(
                "collect.period must be positive, got {}",
                self.collect.period
            )));
        }
        if self.collect.wait_periods < 0 {
            return Err(TollgateError::Config(format!(
                "collect.wait_periods must not be negative, got {}",
                self.collect.wait_periods
            )));
        }
        if self.collect.services.is_empty() {
            return Err(TollgateError::Config(
                "collect.services must name at least one resource type".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = Settings::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.collect.period, 3600);
        assert_eq!(cfg.collect.wait_periods, 2);
        assert!(cfg.collect.services.contains(&"compute".to_string()));
    }

    #[test]
    fn test_invalid_period_rejected() {
        let mut cfg = Settings::default();
        cfg.collect.period = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_empty_services_rejected() {
        let mut cfg = Settings::default();
        cfg.collect.services.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(
            parse_list("compute, image ,volume"),
            vec!["compute", "image", "volume"]
        );
        assert!(parse_list("").is_empty());
    }
}
