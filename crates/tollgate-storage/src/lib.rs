//! # Tollgate Storage
//!
//! Durable storage for rated usage. The [`engine::CommitEngine`] owns all
//! period-buffering and commit-boundary logic; backends only implement the
//! [`StorageBackend`] persistence primitives, so the commit contract holds
//! regardless of the technology behind it.
//!
//! Two backends ship: [`memory::MemoryBackend`] for tests and single-process
//! runs, and [`redis_store::RedisBackend`] for fleet deployments.

pub mod engine;
pub mod memory;
pub mod redis_store;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use tollgate_common::config::StorageSettings;
use tollgate_common::{InvoiceRecord, InvoiceUpdate, PaymentStatus, RatedRecord, StorageError};

pub use engine::CommitEngine;
pub use memory::MemoryBackend;
pub use redis_store::RedisBackend;

/// Filters applied to frame queries
#[derive(Debug, Clone, Default)]
pub struct FrameFilter {
    pub tenant_id: Option<String>,
    /// Exact service match. Marker rows only surface when this names the
    /// reserved no-data tag.
    pub service: Option<String>,
}

impl FrameFilter {
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            service: None,
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// True when the record passes the tenant and service filters
    pub fn matches(&self, record: &RatedRecord) -> bool {
        if let Some(tenant_id) = &self.tenant_id {
            if &record.tenant_id != tenant_id {
                return false;
            }
        }
        if let Some(service) = &self.service {
            if &record.service != service {
                return false;
            }
        }
        true
    }
}

/// Filters applied to invoice queries
#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub tenant_id: Option<String>,
    pub tenant_name: Option<String>,
    pub invoice_id: Option<String>,
    pub payment_status: Option<PaymentStatus>,
}

impl InvoiceFilter {
    pub fn matches(&self, invoice: &InvoiceRecord) -> bool {
        if let Some(tenant_id) = &self.tenant_id {
            if &invoice.tenant_id != tenant_id {
                return false;
            }
        }
        if let Some(tenant_name) = &self.tenant_name {
            if &invoice.tenant_name != tenant_name {
                return false;
            }
        }
        if let Some(invoice_id) = &self.invoice_id {
            if &invoice.invoice_id != invoice_id {
                return false;
            }
        }
        if let Some(status) = self.payment_status {
            if invoice.payment_status != status {
                return false;
            }
        }
        true
    }
}

/// Backend-specific persistence primitives driven by the commit engine.
///
/// Implementations may use any persistence technology; the engine's commit
/// contract is binding regardless. `persist_batch` must be all-or-nothing.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Atomically persist a batch of committed lines
    async fn persist_batch(&self, records: Vec<RatedRecord>) -> Result<(), StorageError>;

    /// Begin timestamp of the most recently committed period, filtered to a
    /// tenant when given
    async fn last_committed(&self, tenant_id: Option<&str>) -> Result<Option<i64>, StorageError>;

    /// Committed rows with `begin >= begin` and `end <= end`, filtered
    async fn query_frames(
        &self,
        begin: i64,
        end: i64,
        filter: &FrameFilter,
    ) -> Result<Vec<RatedRecord>, StorageError>;

    /// Distinct tenants with committed rows in the window, insertion order
    async fn distinct_tenants(&self, begin: i64, end: i64) -> Result<Vec<String>, StorageError>;

    /// Sum of prices over the window; `None` when no rows matched
    async fn sum_prices(
        &self,
        begin: i64,
        end: i64,
        filter: &FrameFilter,
    ) -> Result<Option<Decimal>, StorageError>;

    // Invoice records
    async fn add_invoice(&self, invoice: InvoiceRecord) -> Result<(), StorageError>;

    async fn get_invoices(
        &self,
        filter: &InvoiceFilter,
    ) -> Result<Vec<InvoiceRecord>, StorageError>;

    async fn update_invoice(
        &self,
        invoice_id: &str,
        update: InvoiceUpdate,
    ) -> Result<InvoiceRecord, StorageError>;

    async fn delete_invoice(&self, invoice_id: &str) -> Result<(), StorageError>;
}

type BackendCtor =
    Arc<dyn Fn(&StorageSettings) -> Result<Arc<dyn StorageBackend>, StorageError> + Send + Sync>;

/// Registry mapping storage backend names to constructors
#[derive(Default)]
pub struct StorageRegistry {
    ctors: HashMap<String, BackendCtor>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in backends registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("memory", |_settings| {
            Ok(Arc::new(MemoryBackend::new()) as Arc<dyn StorageBackend>)
        });
        registry.register("redis", |settings| {
            Ok(Arc::new(RedisBackend::new(&settings.redis_url)?) as Arc<dyn StorageBackend>)
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn(&StorageSettings) -> Result<Arc<dyn StorageBackend>, StorageError>
            + Send
            + Sync
            + 'static,
    {
        self.ctors.insert(name.into(), Arc::new(ctor));
    }

    /// Instantiate the backend named by the settings
    pub fn build(&self, settings: &StorageSettings) -> Result<Arc<dyn StorageBackend>, StorageError> {
        let ctor = self
            .ctors
            .get(&settings.backend)
            .ok_or_else(|| StorageError::UnknownBackend(settings.backend.clone()))?;
        ctor(settings)
    }
}
