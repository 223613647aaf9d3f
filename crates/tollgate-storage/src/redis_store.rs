//! Redis storage backend
//!
//! Rated lines are JSON rows in a single list; the per-tenant state keys and
//! the tenant set are updated inside the same MULTI/EXEC transaction as the
//! row pushes, so a commit is visible either completely or not at all.
//!
//! Queries read the full row list and filter in process. That keeps the
//! backend honest about the engine contract without a server-side index;
//! deployments with heavy reporting traffic front this with the API layer's
//! own store.

use std::sync::Arc;

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use tollgate_common::{InvoiceRecord, InvoiceUpdate, RatedRecord, StorageError};

use crate::{FrameFilter, InvoiceFilter, StorageBackend};

/// Storage backend persisting rated lines and invoices in Redis
pub struct RedisBackend {
    client: Client,
    connection: Arc<RwLock<Option<MultiplexedConnection>>>,
    prefix: String,
}

impl RedisBackend {
    pub fn new(redis_url: &str) -> Result<Self, StorageError> {
        let client = Client::open(redis_url)
            .map_err(|e| StorageError::Backend(format!("failed to create redis client: {}", e)))?;

        Ok(Self {
            client,
            connection: Arc::new(RwLock::new(None)),
            prefix: "tollgate:storage".to_string(),
        })
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    fn frames_key(&self) -> String {
        format!("{}:frames", self.prefix)
    }

    fn state_key(&self, tenant_id: &str) -> String {
        format!("{}:state:{}", self.prefix, tenant_id)
    }

    fn tenants_key(&self) -> String {
        format!("{}:tenants", self.prefix)
    }

    fn invoice_key(&self, invoice_id: &str) -> String {
        format!("{}:invoice:{}", self.prefix, invoice_id)
    }

    fn invoice_index_key(&self) -> String {
        format!("{}:invoices", self.prefix)
    }

    /// Get a connection, establishing or re-establishing it as needed
    async fn get_connection(&self) -> Result<MultiplexedConnection, StorageError> {
        let guard = self.connection.read().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        drop(guard);

        let mut guard = self.connection.write().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect to redis: {}", e)))?;

        *guard = Some(connection.clone());
        Ok(connection)
    }

    /// Read and deserialize every stored row
    async fn all_frames(&self) -> Result<Vec<RatedRecord>, StorageError> {
        let mut conn = self.get_connection().await?;
        let raw: Vec<String> = conn.lrange(self.frames_key(), 0, -1).await.map_err(|e| {
            warn!("frame scan error: {}", e);
            StorageError::Backend(format!("redis LRANGE failed: {}", e))
        })?;

        let mut records = Vec::with_capacity(raw.len());
        for row in raw {
            records.push(serde_json::from_str(&row)?);
        }
        Ok(records)
    }

    fn in_window(record: &RatedRecord, begin: i64, end: i64) -> bool {
        record.begin >= begin && record.end <= end
    }
}

#[async_trait]
impl StorageBackend for RedisBackend {
    async fn persist_batch(&self, records: Vec<RatedRecord>) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for record in &records {
            let row = serde_json::to_string(record)?;
            pipe.rpush(self.frames_key(), row).ignore();
        }
        // One engine commit carries a single tenant-period, but stay correct
        // for arbitrary batches: advance each tenant's state to its max begin.
        for record in &records {
            pipe.set(self.state_key(&record.tenant_id), record.begin)
                .ignore();
            pipe.sadd(self.tenants_key(), &record.tenant_id).ignore();
        }

        let mut conn = self.get_connection().await?;
        pipe.query_async::<_, ()>(&mut conn).await.map_err(|e| {
            warn!("commit transaction error: {}", e);
            StorageError::Backend(format!("redis MULTI/EXEC failed: {}", e))
        })?;

        debug!(rows = records.len(), "persisted batch");
        Ok(())
    }

    async fn last_committed(&self, tenant_id: Option<&str>) -> Result<Option<i64>, StorageError> {
        let mut conn = self.get_connection().await?;

        let tenants: Vec<String> = match tenant_id {
            Some(tenant) => vec![tenant.to_string()],
            None => conn.smembers(self.tenants_key()).await.map_err(|e| {
                StorageError::Backend(format!("redis SMEMBERS failed: {}", e))
            })?,
        };

        let mut latest: Option<i64> = None;
        for tenant in tenants {
            let state: Option<i64> = conn.get(self.state_key(&tenant)).await.map_err(|e| {
                StorageError::Backend(format!("redis GET failed: {}", e))
            })?;
            if let Some(begin) = state {
                latest = Some(latest.map_or(begin, |ts| ts.max(begin)));
            }
        }
        Ok(latest)
    }

    async fn query_frames(
        &self,
        begin: i64,
        end: i64,
        filter: &FrameFilter,
    ) -> Result<Vec<RatedRecord>, StorageError> {
        let records = self.all_frames().await?;
        Ok(records
            .into_iter()
            .filter(|r| Self::in_window(r, begin, end) && filter.matches(r))
            .collect())
    }

    async fn distinct_tenants(&self, begin: i64, end: i64) -> Result<Vec<String>, StorageError> {
        let records = self.all_frames().await?;
        let mut tenants: Vec<String> = Vec::new();
        for record in records.iter().filter(|r| Self::in_window(r, begin, end)) {
            if !tenants.contains(&record.tenant_id) {
                tenants.push(record.tenant_id.clone());
            }
        }
        Ok(tenants)
    }

    async fn sum_prices(
        &self,
        begin: i64,
        end: i64,
        filter: &FrameFilter,
    ) -> Result<Option<Decimal>, StorageError> {
        let records = self.all_frames().await?;
        let mut total: Option<Decimal> = None;
        for record in records
            .iter()
            .filter(|r| Self::in_window(r, begin, end) && filter.matches(r))
        {
            total = Some(total.unwrap_or(Decimal::ZERO) + record.price);
        }
        Ok(total)
    }

    async fn add_invoice(&self, invoice: InvoiceRecord) -> Result<(), StorageError> {
        let payload = serde_json::to_string(&invoice)?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(self.invoice_key(&invoice.invoice_id), payload)
            .ignore()
            .rpush(self.invoice_index_key(), &invoice.invoice_id)
            .ignore();

        let mut conn = self.get_connection().await?;
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(format!("redis invoice add failed: {}", e)))?;
        Ok(())
    }

    async fn get_invoices(
        &self,
        filter: &InvoiceFilter,
    ) -> Result<Vec<InvoiceRecord>, StorageError> {
        let mut conn = self.get_connection().await?;
        let ids: Vec<String> = conn
            .lrange(self.invoice_index_key(), 0, -1)
            .await
            .map_err(|e| StorageError::Backend(format!("redis LRANGE failed: {}", e)))?;

        let mut invoices = Vec::new();
        for id in ids {
            let payload: Option<String> = conn
                .get(self.invoice_key(&id))
                .await
                .map_err(|e| StorageError::Backend(format!("redis GET failed: {}", e)))?;
            if let Some(payload) = payload {
                let invoice: InvoiceRecord = serde_json::from_str(&payload)?;
                if filter.matches(&invoice) {
                    invoices.push(invoice);
                }
            }
        }
        Ok(invoices)
    }

    async fn update_invoice(
        &self,
        invoice_id: &str,
        update: InvoiceUpdate,
    ) -> Result<InvoiceRecord, StorageError> {
        let mut conn = self.get_connection().await?;
        let payload: Option<String> = conn
            .get(self.invoice_key(invoice_id))
            .await
            .map_err(|e| StorageError::Backend(format!("redis GET failed: {}", e)))?;
        let payload =
            payload.ok_or_else(|| StorageError::InvoiceNotFound(invoice_id.to_string()))?;

        let mut invoice: InvoiceRecord = serde_json::from_str(&payload)?;
        update.apply(&mut invoice);

        let updated = serde_json::to_string(&invoice)?;
        conn.set::<_, _, ()>(self.invoice_key(invoice_id), updated)
            .await
            .map_err(|e| StorageError::Backend(format!("redis SET failed: {}", e)))?;
        Ok(invoice)
    }

    async fn delete_invoice(&self, invoice_id: &str) -> Result<(), StorageError> {
        let mut conn = self.get_connection().await?;
        let removed: i64 = conn
            .del(self.invoice_key(invoice_id))
            .await
            .map_err(|e| StorageError::Backend(format!("redis DEL failed: {}", e)))?;
        if removed == 0 {
            return Err(StorageError::InvoiceNotFound(invoice_id.to_string()));
        }
        conn.lrem::<_, _, ()>(self.invoice_index_key(), 0, invoice_id)
            .await
            .map_err(|e| StorageError::Backend(format!("redis LREM failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let backend = RedisBackend::new("redis://localhost:6379")
            .unwrap()
            .with_prefix("test");
        assert_eq!(backend.frames_key(), "test:frames");
        assert_eq!(backend.state_key("tenant-1"), "test:state:tenant-1");
        assert_eq!(backend.invoice_key("demo-5-2016"), "test:invoice:demo-5-2016");
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(RedisBackend::new("not-a-url").is_err());
    }
}
