//! Per-tenant processing
//!
//! A worker drives one tenant through collect → rate → commit for as many
//! periods as the readiness gate allows, all under that tenant's fleet lock.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use tollgate_collect::Collector;
use tollgate_common::time::utcnow_ts;
use tollgate_common::{CollectError, Period, PeriodClock, Result, UsageFrame};
use tollgate_rating::RatingPipeline;
use tollgate_storage::CommitEngine;

/// Processes one tenant while its fleet lock is held
pub struct Worker {
    collector: Arc<dyn Collector>,
    pipeline: RatingPipeline,
    store: Arc<CommitEngine>,
    clock: PeriodClock,
    services: Vec<String>,
    tenant_id: String,
}

impl Worker {
    pub fn new(
        collector: Arc<dyn Collector>,
        pipeline: RatingPipeline,
        store: Arc<CommitEngine>,
        clock: PeriodClock,
        services: Vec<String>,
        tenant_id: String,
    ) -> Self {
        Self {
            collector,
            pipeline,
            store,
            clock,
            services,
            tenant_id,
        }
    }

    /// Next period begin ready for this tenant, if any
    async fn check_state(&self) -> Result<Option<i64>> {
        let last = self.store.get_state(Some(&self.tenant_id)).await?;
        Ok(self.clock.next_ready(last, utcnow_ts()))
    }

    /// Collect one service's usage for one period as a period-bounded frame.
    ///
    /// An empty sample list counts as no data.
    async fn collect(
        &self,
        service: &str,
        start: i64,
    ) -> std::result::Result<Vec<UsageFrame>, CollectError> {
        let end = start + self.clock.period();
        let items = self
            .collector
            .retrieve(service, start, end, &self.tenant_id)
            .await?;
        if items.is_empty() {
            return Err(CollectError::no_data(self.collector.name(), service));
        }
        Ok(vec![
            UsageFrame::new(Period::new(start, end)).with_service(service, items)
        ])
    }

    /// Process every ready period for this tenant.
    ///
    /// Collection failures downgrade to no-data for the failing service
    /// only; rating and storage failures propagate so the caller releases
    /// the lock without advancing state.
    #[instrument(skip(self), fields(tenant_id = %self.tenant_id))]
    pub async fn run(&self) -> Result<()> {
        while let Some(timestamp) = self.check_state().await? {
            for service in &self.services {
                let collected = match self.collect(service, timestamp).await {
                    Ok(frames) => Some(frames),
                    Err(err) if err.is_no_data() => {
                        debug!(service = %service, "no data collected");
                        None
                    }
                    Err(err) => {
                        warn!(service = %service, error = %err, "error while collecting service");
                        None
                    }
                };

                match collected {
                    Some(mut frames) => {
                        self.pipeline.process(&mut frames);
                        self.store.append(frames, &self.tenant_id).await?;
                    }
                    None => {
                        let begin = timestamp;
                        let end = begin + self.clock.period();
                        self.pipeline.nodata(begin, end);
                        self.store.nodata(begin, end, &self.tenant_id).await?;
                    }
                }
            }

            // A full period boundary was reached, commit without waiting
            // for the next crossing.
            self.store.commit(&self.tenant_id).await?;
        }
        Ok(())
    }
}
