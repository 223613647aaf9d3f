//! In-memory storage backend
//!
//! Backs tests and single-process deployments. Rows are kept in append
//! order, which is what gives `distinct_tenants` its insertion-order
//! guarantee.

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use tollgate_common::{InvoiceRecord, InvoiceUpdate, RatedRecord, StorageError};

use crate::{FrameFilter, InvoiceFilter, StorageBackend};

/// Storage backend holding all rows in process memory
#[derive(Default)]
pub struct MemoryBackend {
    frames: RwLock<Vec<RatedRecord>>,
    invoices: RwLock<Vec<InvoiceRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed rows, markers included
    pub fn len(&self) -> usize {
        self.frames.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.read().is_empty()
    }

    fn in_window(record: &RatedRecord, begin: i64, end: i64) -> bool {
        record.begin >= begin && record.end <= end
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn persist_batch(&self, records: Vec<RatedRecord>) -> Result<(), StorageError> {
        // Single write-lock extend keeps the batch all-or-nothing
        self.frames.write().extend(records);
        Ok(())
    }

    async fn last_committed(&self, tenant_id: Option<&str>) -> Result<Option<i64>, StorageError> {
        let frames = self.frames.read();
        Ok(frames
            .iter()
            .filter(|r| tenant_id.map_or(true, |t| r.tenant_id == t))
            .map(|r| r.begin)
            .max())
    }

    async fn query_frames(
        &self,
        begin: i64,
        end: i64,
        filter: &FrameFilter,
    ) -> Result<Vec<RatedRecord>, StorageError> {
        let frames = self.frames.read();
        Ok(frames
            .iter()
            .filter(|r| Self::in_window(r, begin, end) && filter.matches(r))
            .cloned()
            .collect())
    }

    async fn distinct_tenants(&self, begin: i64, end: i64) -> Result<Vec<String>, StorageError> {
        let frames = self.frames.read();
        let mut tenants: Vec<String> = Vec::new();
        for record in frames.iter().filter(|r| Self::in_window(r, begin, end)) {
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
        let frames = self.frames.read();
        let mut total: Option<Decimal> = None;
        for record in frames
            .iter()
            .filter(|r| Self::in_window(r, begin, end) && filter.matches(r))
        {
            total = Some(total.unwrap_or(Decimal::ZERO) + record.price);
        }
        Ok(total)
    }

    async fn add_invoice(&self, invoice: InvoiceRecord) -> Result<(), StorageError> {
        self.invoices.write().push(invoice);
        Ok(())
    }

    async fn get_invoices(
        &self,
        filter: &InvoiceFilter,
    ) -> Result<Vec<InvoiceRecord>, StorageError> {
        let invoices = self.invoices.read();
        Ok(invoices.iter().filter(|i| filter.matches(i)).cloned().collect())
    }

    async fn update_invoice(
        &self,
        invoice_id: &str,
        update: InvoiceUpdate,
    ) -> Result<InvoiceRecord, StorageError> {
        let mut invoices = self.invoices.write();
        let invoice = invoices
            .iter_mut()
            .find(|i| i.invoice_id == invoice_id)
            .ok_or_else(|| StorageError::InvoiceNotFound(invoice_id.to_string()))?;
        update.apply(invoice);
        Ok(invoice.clone())
    }

    async fn delete_invoice(&self, invoice_id: &str) -> Result<(), StorageError> {
        let mut invoices = self.invoices.write();
        let before = invoices.len();
        invoices.retain(|i| i.invoice_id != invoice_id);
        if invoices.len() == before {
            return Err(StorageError::InvoiceNotFound(invoice_id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use tollgate_common::PaymentStatus;

    fn invoice(id: &str, tenant_name: &str, status: PaymentStatus) -> InvoiceRecord {
        InvoiceRecord {
            invoice_id: id.to_string(),
            tenant_id: format!("{tenant_name}-id"),
            tenant_name: tenant_name.to_string(),
            issued_at: 1420070400,
            period_from: 1420070400,
            period_to: 1420074000,
            detail: json!({"dict_all_cost_total": "6.64"}),
            total_cost: dec!(6.64),
            paid_cost: dec!(0.11),
            balance_cost: dec!(6.53),
            payment_status: status,
        }
    }

    #[tokio::test]
    async fn test_invoice_round_trip() {
        let backend = MemoryBackend::new();
        backend
            .add_invoice(invoice("demo-5-2016", "demo", PaymentStatus::Unpaid))
            .await
            .unwrap();
        backend
            .add_invoice(invoice("admin-5-2016", "admin", PaymentStatus::Paid))
            .await
            .unwrap();

        let by_name = backend
            .get_invoices(&InvoiceFilter {
                tenant_name: Some("demo".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].invoice_id, "demo-5-2016");

        let by_status = backend
            .get_invoices(&InvoiceFilter {
                payment_status: Some(PaymentStatus::Paid),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_status.len(), 1);
        assert_eq!(by_status[0].invoice_id, "admin-5-2016");
    }

    #[tokio::test]
    async fn test_invoice_update_only_touches_given_fields() {
        let backend = MemoryBackend::new();
        backend
            .add_invoice(invoice("demo-5-2016", "demo", PaymentStatus::Unpaid))
            .await
            .unwrap();

        let updated = backend
            .update_invoice(
                "demo-5-2016",
                InvoiceUpdate {
                    paid_cost: Some(dec!(6.64)),
                    balance_cost: Some(dec!(0)),
                    payment_status: Some(PaymentStatus::Paid),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.total_cost, dec!(6.64));
        assert_eq!(updated.paid_cost, dec!(6.64));
        assert_eq!(updated.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_invoice_update_unknown_id() {
        let backend = MemoryBackend::new();
        let err = backend
            .update_invoice("missing", InvoiceUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvoiceNotFound(_)));
    }

    #[tokio::test]
    async fn test_invoice_delete() {
        let backend = MemoryBackend::new();
        backend
            .add_invoice(invoice("demo-5-2016", "demo", PaymentStatus::Unpaid))
            .await
            .unwrap();
        backend.delete_invoice("demo-5-2016").await.unwrap();
        let remaining = backend
            .get_invoices(&InvoiceFilter::default())
            .await
            .unwrap();
        assert!(remaining.is_empty());

        let err = backend.delete_invoice("demo-5-2016").await.unwrap_err();
        assert!(matches!(err, StorageError::InvoiceNotFound(_)));
    }
}
