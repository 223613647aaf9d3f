//! Usage buffer and commit engine
//!
//! Accepts arbitrarily-ordered batches of period-stamped usage frames and
//! guarantees each (tenant, period) pair is committed to the backend exactly
//! once, with a synthetic marker when a period produced nothing.
//!
//! The engine owns the control flow; the injected [`StorageBackend`] only
//! implements the persistence primitives. Same-tenant calls must not run
//! concurrently — the fleet lock enforces that, not the engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::debug;

use tollgate_common::time::{month_start_ts, next_month_start_ts};
use tollgate_common::{
    InvoiceRecord, InvoiceUpdate, RatedRecord, StorageError, UsageFrame, UsageItem,
};

use crate::{FrameFilter, InvoiceFilter, StorageBackend};

/// Open, uncommitted staging buffer for one tenant's current period
#[derive(Debug)]
struct TenantBuffer {
    usage_start: i64,
    usage_end: i64,
    has_data: bool,
    staged: Vec<RatedRecord>,
}

/// Fixed-control-flow commit engine over an injected storage backend.
///
/// One open buffer per tenant at most; a frame starting at or past the open
/// buffer's end commits the buffered period before staging begins.
pub struct CommitEngine {
    backend: Arc<dyn StorageBackend>,
    period: i64,
    buffers: DashMap<String, TenantBuffer>,
}

impl CommitEngine {
    pub fn new(backend: Arc<dyn StorageBackend>, period: i64) -> Self {
        Self {
            backend,
            period,
            buffers: DashMap::new(),
        }
    }

    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        self.backend.clone()
    }

    /// Remove and return the pending frame with the smallest period begin.
    ///
    /// Ties resolve to the first occurrence, so ingestion order is stable
    /// for equal timestamps.
    fn filter_period(frames: &mut Vec<UsageFrame>) -> Option<UsageFrame> {
        let mut candidate: Option<(usize, i64)> = None;
        for (idx, frame) in frames.iter().enumerate() {
            let begin = frame.period.begin;
            if candidate.map_or(true, |(_, ts)| begin < ts) {
                candidate = Some((idx, begin));
            }
        }
        candidate.map(|(idx, _)| frames.remove(idx))
    }

    /// Commit the open buffer if `usage_start` crosses its end, then make
    /// sure a buffer is open for the incoming period.
    async fn check_commit(&self, usage_start: i64, tenant_id: &str) -> Result<(), StorageError> {
        let crossed = self
            .buffers
            .get(tenant_id)
            .map_or(false, |buf| usage_start >= buf.usage_end);
        if crossed {
            self.commit(tenant_id).await?;
        }
        self.buffers
            .entry(tenant_id.to_string())
            .or_insert_with(|| TenantBuffer {
                usage_start,
                usage_end: usage_start + self.period,
                has_data: false,
                staged: Vec::new(),
            });
        Ok(())
    }

    /// Stage one frame's usage under the tenant's open buffer
    fn dispatch(&self, usage: BTreeMap<String, Vec<UsageItem>>, tenant_id: &str) {
        if let Some(mut buf) = self.buffers.get_mut(tenant_id) {
            let (begin, end) = (buf.usage_start, buf.usage_end);
            for (service, items) in usage {
                for item in items {
                    buf.staged
                        .push(RatedRecord::from_item(tenant_id, begin, end, &service, item));
                    buf.has_data = true;
                }
            }
        }
    }

    /// Append rated frames, committing buffered periods as boundaries cross.
    ///
    /// Frames may arrive in any order; they are ingested in ascending
    /// period-begin order regardless.
    pub async fn append(
        &self,
        mut frames: Vec<UsageFrame>,
        tenant_id: &str,
    ) -> Result<(), StorageError> {
        while let Some(frame) = Self::filter_period(&mut frames) {
            self.check_commit(frame.period.begin, tenant_id).await?;
            self.dispatch(frame.usage, tenant_id);
        }
        Ok(())
    }

    /// Account for a period that produced no usage.
    ///
    /// Stages nothing; the boundary check alone opens (or rolls over) the
    /// buffer so the period still leaves a durable trace at commit time.
    pub async fn nodata(&self, begin: i64, _end: i64, tenant_id: &str) -> Result<(), StorageError> {
        self.check_commit(begin, tenant_id).await
    }

    /// Commit the tenant's open buffer.
    ///
    /// Three phases: stage a no-data marker when the period was empty,
    /// persist the whole batch atomically, then clear all buffer state.
    /// With no open buffer this is a no-op. On backend failure the buffer
    /// is kept so the next cycle retries the same period.
    pub async fn commit(&self, tenant_id: &str) -> Result<(), StorageError> {
        let batch = {
            let Some(mut buf) = self.buffers.get_mut(tenant_id) else {
                return Ok(());
            };
            if !buf.has_data && buf.staged.is_empty() {
                let marker =
                    RatedRecord::no_data_marker(tenant_id, buf.usage_start, buf.usage_end);
                buf.staged.push(marker);
            }
            buf.staged.clone()
        };

        self.backend.persist_batch(batch).await?;
        self.buffers.remove(tenant_id);
        debug!(tenant_id, "committed period buffer");
        Ok(())
    }

    /// True when an uncommitted buffer is open for the tenant
    pub fn has_open_buffer(&self, tenant_id: &str) -> bool {
        self.buffers.contains_key(tenant_id)
    }

    /// True when usage has been staged for the tenant's open period
    pub fn has_data(&self, tenant_id: &str) -> bool {
        self.buffers
            .get(tenant_id)
            .map_or(false, |buf| buf.has_data)
    }

    /// Open buffer boundaries for the tenant, if any
    pub fn open_period(&self, tenant_id: &str) -> Option<(i64, i64)> {
        self.buffers
            .get(tenant_id)
            .map(|buf| (buf.usage_start, buf.usage_end))
    }

    /// Begin timestamp of the most recently committed period.
    ///
    /// Only committed data counts; open buffers are invisible here.
    pub async fn get_state(&self, tenant_id: Option<&str>) -> Result<Option<i64>, StorageError> {
        self.backend.last_committed(tenant_id).await
    }

    /// Committed rows in `[begin, end)`, marker rows hidden unless the
    /// service filter explicitly names the reserved tag.
    ///
    /// Zero matches yield [`StorageError::NoTimeFrame`]; reporting callers
    /// render that as an empty result.
    pub async fn get_time_frame(
        &self,
        begin: i64,
        end: i64,
        filter: &FrameFilter,
    ) -> Result<Vec<RatedRecord>, StorageError> {
        let rows = self.backend.query_frames(begin, end, filter).await?;
        let rows: Vec<RatedRecord> = if filter.service.is_none() {
            rows.into_iter().filter(|r| !r.is_no_data_marker()).collect()
        } else {
            rows
        };
        if rows.is_empty() {
            return Err(StorageError::NoTimeFrame);
        }
        Ok(rows)
    }

    /// Total price over the window, defaulting to the calendar month
    /// containing `now`; `None` when nothing matched
    pub async fn get_total(
        &self,
        begin: Option<i64>,
        end: Option<i64>,
        filter: &FrameFilter,
        now: i64,
    ) -> Result<Option<Decimal>, StorageError> {
        let begin = begin.unwrap_or_else(|| month_start_ts(now));
        let end = end.unwrap_or_else(|| next_month_start_ts(now));
        self.backend.sum_prices(begin, end, filter).await
    }

    /// Distinct rated tenants over the window, defaulting to the calendar
    /// month containing `now`, in insertion order
    pub async fn get_tenants(
        &self,
        begin: Option<i64>,
        end: Option<i64>,
        now: i64,
    ) -> Result<Vec<String>, StorageError> {
        let begin = begin.unwrap_or_else(|| month_start_ts(now));
        let end = end.unwrap_or_else(|| next_month_start_ts(now));
        self.backend.distinct_tenants(begin, end).await
    }

    // Invoice records are plain pass-throughs to the backend.

    pub async fn add_invoice(&self, invoice: InvoiceRecord) -> Result<(), StorageError> {
        self.backend.add_invoice(invoice).await
    }

    pub async fn get_invoices(
        &self,
        filter: &InvoiceFilter,
    ) -> Result<Vec<InvoiceRecord>, StorageError> {
        self.backend.get_invoices(filter).await
    }

    pub async fn update_invoice(
        &self,
        invoice_id: &str,
        update: InvoiceUpdate,
    ) -> Result<InvoiceRecord, StorageError> {
        self.backend.update_invoice(invoice_id, update).await
    }

    pub async fn delete_invoice(&self, invoice_id: &str) -> Result<(), StorageError> {
        self.backend.delete_invoice(invoice_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use tollgate_common::{Period, NO_DATA_SERVICE};

    const TENANT: &str = "f266f30b11f246b589fd266f85eeec39";
    const OTHER_TENANT: &str = "8d3ae50089ea4142-9c6e1269db6a0b64";
    const T0: i64 = 1420070400; // 2015-01-01T00:00:00Z
    const PERIOD: i64 = 3600;
    const FIRST_BEGIN: i64 = T0;
    const FIRST_END: i64 = T0 + PERIOD;
    const SECOND_BEGIN: i64 = FIRST_END;
    const SECOND_END: i64 = SECOND_BEGIN + PERIOD;

    fn compute_item() -> UsageItem {
        UsageItem::new(
            json!({"flavor": "m1.nano", "instance_id": "26c084e1"}),
            dec!(1),
            "instance",
        )
        .with_price(dec!(0.42))
    }

    fn image_item() -> UsageItem {
        UsageItem::new(json!({"name": "cirros-0.3.2"}), dec!(1), "image").with_price(dec!(0.1337))
    }

    /// Two consecutive periods: compute+image, then compute only
    fn rated_data() -> Vec<UsageFrame> {
        vec![
            UsageFrame::new(Period::new(FIRST_BEGIN, FIRST_END))
                .with_service("compute", vec![compute_item()])
                .with_service("image", vec![image_item()]),
            UsageFrame::new(Period::new(SECOND_BEGIN, SECOND_END))
                .with_service("compute", vec![compute_item()]),
        ]
    }

    fn engine() -> CommitEngine {
        CommitEngine::new(Arc::new(MemoryBackend::new()), PERIOD)
    }

    #[test]
    fn test_filter_period_selects_minimum() {
        let mut frames = rated_data();
        frames.reverse();

        let first = CommitEngine::filter_period(&mut frames).unwrap();
        assert_eq!(first.period.begin, FIRST_BEGIN);
        let second = CommitEngine::filter_period(&mut frames).unwrap();
        assert_eq!(second.period.begin, SECOND_BEGIN);
        assert!(CommitEngine::filter_period(&mut frames).is_none());
    }

    #[test]
    fn test_filter_period_stable_tie_break() {
        let mut frames = vec![
            UsageFrame::new(Period::new(FIRST_BEGIN, FIRST_END))
                .with_service("compute", vec![compute_item()]),
            UsageFrame::new(Period::new(FIRST_BEGIN, FIRST_END))
                .with_service("image", vec![image_item()]),
        ];
        let first = CommitEngine::filter_period(&mut frames).unwrap();
        assert!(first.usage.contains_key("compute"));
    }

    #[tokio::test]
    async fn test_has_data_flag_behaviour() {
        let engine = engine();
        assert!(!engine.has_data(TENANT));

        engine.nodata(FIRST_BEGIN, FIRST_END, TENANT).await.unwrap();
        assert!(!engine.has_data(TENANT));

        let second_only = vec![rated_data().remove(1)];
        engine.append(second_only, TENANT).await.unwrap();
        assert!(engine.has_data(TENANT));

        engine.commit(TENANT).await.unwrap();
        assert!(!engine.has_data(TENANT));
    }

    #[tokio::test]
    async fn test_notify_no_data() {
        let engine = engine();
        engine.nodata(FIRST_BEGIN, FIRST_END, TENANT).await.unwrap();
        let second_only = vec![rated_data().remove(1)];
        engine.append(second_only, TENANT).await.unwrap();

        let err = engine
            .get_time_frame(FIRST_BEGIN, FIRST_END, &FrameFilter::tenant(TENANT))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NoTimeFrame));

        let markers = engine
            .get_time_frame(
                FIRST_BEGIN,
                FIRST_END,
                &FrameFilter::tenant(TENANT).with_service(NO_DATA_SERVICE),
            )
            .await
            .unwrap();
        assert_eq!(markers.len(), 1);
        assert!(markers[0].is_no_data_marker());
    }

    #[tokio::test]
    async fn test_send_nodata_between_data_leaves_no_marker() {
        let engine = engine();
        for frame in rated_data() {
            let period = frame.period;
            for (service, items) in frame.usage {
                let sub = vec![UsageFrame::new(period).with_service(service.clone(), items)];
                engine.append(sub, TENANT).await.unwrap();
                if service == "compute" {
                    engine
                        .nodata(period.begin, period.end, TENANT)
                        .await
                        .unwrap();
                }
            }
            engine.commit(TENANT).await.unwrap();
        }

        let err = engine
            .get_time_frame(
                FIRST_BEGIN,
                SECOND_END,
                &FrameFilter::default().with_service(NO_DATA_SERVICE),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NoTimeFrame));
    }

    #[tokio::test]
    async fn test_auto_commit_on_period_change() {
        let engine = engine();
        engine.append(rated_data(), TENANT).await.unwrap();

        // Period one was committed by the boundary crossing; period two is
        // still buffered awaiting a commit or the next crossing.
        let stored = engine
            .get_time_frame(FIRST_BEGIN, SECOND_END, &FrameFilter::default())
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|r| r.begin == FIRST_BEGIN));

        engine.commit(TENANT).await.unwrap();
        let stored = engine
            .get_time_frame(FIRST_BEGIN, SECOND_END, &FrameFilter::default())
            .await
            .unwrap();
        assert_eq!(stored.len(), 3);
    }

    #[tokio::test]
    async fn test_two_periods_in_one_append_call() {
        let engine = engine();
        let frames = vec![
            UsageFrame::new(Period::new(FIRST_BEGIN, FIRST_END))
                .with_service("compute", vec![compute_item()]),
            UsageFrame::new(Period::new(SECOND_BEGIN, SECOND_END))
                .with_service("compute", vec![compute_item()]),
        ];
        engine.append(frames, TENANT).await.unwrap();

        let stored = engine
            .get_time_frame(FIRST_BEGIN, FIRST_BEGIN + 2 * PERIOD, &FrameFilter::default())
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].begin, FIRST_BEGIN);

        engine.commit(TENANT).await.unwrap();
        let stored = engine
            .get_time_frame(FIRST_BEGIN, FIRST_BEGIN + 2 * PERIOD, &FrameFilter::default())
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_append_order_independence() {
        let sorted = engine();
        sorted.append(rated_data(), TENANT).await.unwrap();
        sorted.commit(TENANT).await.unwrap();

        let shuffled = engine();
        let mut frames = rated_data();
        frames.reverse();
        shuffled.append(frames, TENANT).await.unwrap();
        shuffled.commit(TENANT).await.unwrap();

        let lhs = sorted
            .get_time_frame(FIRST_BEGIN, SECOND_END, &FrameFilter::default())
            .await
            .unwrap();
        let rhs = shuffled
            .get_time_frame(FIRST_BEGIN, SECOND_END, &FrameFilter::default())
            .await
            .unwrap();
        assert_eq!(lhs, rhs);
    }

    #[tokio::test]
    async fn test_buffer_lifecycle_on_append_and_commit() {
        let engine = engine();
        assert!(!engine.has_open_buffer(TENANT));

        let mut frames = rated_data();
        let second = frames.pop().unwrap();
        engine.append(frames, TENANT).await.unwrap();
        assert_eq!(engine.open_period(TENANT), Some((FIRST_BEGIN, FIRST_END)));

        engine.append(vec![second], TENANT).await.unwrap();
        assert_eq!(engine.open_period(TENANT), Some((SECOND_BEGIN, SECOND_END)));

        engine.commit(TENANT).await.unwrap();
        assert!(!engine.has_open_buffer(TENANT));
    }

    #[tokio::test]
    async fn test_commit_without_buffer_is_noop() {
        let engine = engine();
        engine.commit(TENANT).await.unwrap();
        assert_eq!(engine.get_state(Some(TENANT)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_state_reflects_only_committed_periods() {
        let engine = engine();
        assert_eq!(engine.get_state(None).await.unwrap(), None);

        engine.append(rated_data(), TENANT).await.unwrap();
        // Second period is buffered, not committed
        assert_eq!(engine.get_state(Some(TENANT)).await.unwrap(), Some(FIRST_BEGIN));

        engine.commit(TENANT).await.unwrap();
        assert_eq!(
            engine.get_state(Some(TENANT)).await.unwrap(),
            Some(SECOND_BEGIN)
        );
    }

    #[tokio::test]
    async fn test_get_state_on_no_data_frame() {
        let engine = engine();
        engine.nodata(FIRST_BEGIN, FIRST_END, TENANT).await.unwrap();
        engine.commit(TENANT).await.unwrap();
        assert_eq!(
            engine.get_state(Some(TENANT)).await.unwrap(),
            Some(FIRST_BEGIN)
        );
    }

    async fn insert_different_data_two_tenants(engine: &CommitEngine) {
        let mut data = rated_data();
        let second = data.pop().unwrap();
        engine.append(data, TENANT).await.unwrap();
        engine.append(vec![second], OTHER_TENANT).await.unwrap();
        engine.commit(TENANT).await.unwrap();
        engine.commit(OTHER_TENANT).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_state_per_tenant() {
        let engine = engine();
        insert_different_data_two_tenants(&engine).await;

        assert_eq!(
            engine.get_state(Some(TENANT)).await.unwrap(),
            Some(FIRST_BEGIN)
        );
        assert_eq!(
            engine.get_state(Some(OTHER_TENANT)).await.unwrap(),
            Some(SECOND_BEGIN)
        );
        // Global state is the latest across tenants
        assert_eq!(engine.get_state(None).await.unwrap(), Some(SECOND_BEGIN));
    }

    #[tokio::test]
    async fn test_get_frame_filters() {
        let engine = engine();
        insert_different_data_two_tenants(&engine).await;

        let err = engine
            .get_time_frame(FIRST_BEGIN - PERIOD, FIRST_BEGIN, &FrameFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NoTimeFrame));

        let one_period = engine
            .get_time_frame(FIRST_BEGIN, FIRST_END, &FrameFilter::default())
            .await
            .unwrap();
        assert_eq!(one_period.len(), 2);

        let both_periods = engine
            .get_time_frame(FIRST_BEGIN, SECOND_END, &FrameFilter::default())
            .await
            .unwrap();
        assert_eq!(both_periods.len(), 3);

        let err = engine
            .get_time_frame(FIRST_BEGIN, FIRST_END, &FrameFilter::tenant(OTHER_TENANT))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NoTimeFrame));
    }

    #[tokio::test]
    async fn test_get_total() {
        let engine = engine();
        engine.append(rated_data(), TENANT).await.unwrap();
        engine.commit(TENANT).await.unwrap();

        let empty = engine
            .get_total(
                Some(FIRST_BEGIN - PERIOD),
                Some(FIRST_BEGIN),
                &FrameFilter::default(),
                T0,
            )
            .await
            .unwrap();
        assert_eq!(empty, None);

        let first_period = engine
            .get_total(
                Some(FIRST_BEGIN),
                Some(FIRST_END),
                &FrameFilter::default(),
                T0,
            )
            .await
            .unwrap();
        assert_eq!(first_period, Some(dec!(0.5537)));

        let compute_only = engine
            .get_total(
                Some(FIRST_BEGIN),
                Some(SECOND_END),
                &FrameFilter::default().with_service("compute"),
                T0,
            )
            .await
            .unwrap();
        assert_eq!(compute_only, Some(dec!(0.84)));

        // Defaults cover the month containing `now`
        let month = engine
            .get_total(None, None, &FrameFilter::default(), T0)
            .await
            .unwrap();
        assert_eq!(month, Some(dec!(0.9737)));
    }

    #[tokio::test]
    async fn test_get_tenants_filtering_on_period() {
        let engine = engine();
        insert_different_data_two_tenants(&engine).await;

        let both = engine
            .get_tenants(Some(FIRST_BEGIN), Some(SECOND_END), T0)
            .await
            .unwrap();
        assert_eq!(both, vec![TENANT.to_string(), OTHER_TENANT.to_string()]);

        let first_only = engine
            .get_tenants(Some(FIRST_BEGIN), Some(FIRST_END), T0)
            .await
            .unwrap();
        assert_eq!(first_only, vec![TENANT.to_string()]);

        let second_only = engine
            .get_tenants(Some(SECOND_BEGIN), Some(SECOND_END), T0)
            .await
            .unwrap();
        assert_eq!(second_only, vec![OTHER_TENANT.to_string()]);
    }

    #[tokio::test]
    async fn test_get_tenants_empty_window() {
        let engine = engine();
        insert_different_data_two_tenants(&engine).await;
        let none = engine
            .get_tenants(Some(FIRST_BEGIN - PERIOD), Some(FIRST_BEGIN), T0)
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
