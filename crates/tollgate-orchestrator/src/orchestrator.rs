//! Top-level control loop
//!
//! Discovers tenants, acquires the per-tenant fleet lock, and runs a worker
//! for every tenant with a ready period. Runs forever; several processes can
//! run the same loop against shared storage and coordination backends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tollgate_collect::transformers::TransformerSet;
use tollgate_collect::{Collector, CollectorRegistry};
use tollgate_common::config::Settings;
use tollgate_common::time::utcnow_ts;
use tollgate_common::{PeriodClock, Result};
use tollgate_rating::{RatingPipeline, RatingRegistry};
use tollgate_storage::{CommitEngine, StorageRegistry};

use crate::coordination::{get_coordinator, Coordinator, DistributedLock};
use crate::endpoint::RatingCommandState;
use crate::fetcher::{FetcherRegistry, TenantFetcher};
use crate::worker::Worker;

/// Delay between dispatch passes while tenants are still lock-contended
const CONTENTION_BACKOFF: Duration = Duration::from_secs(1);

/// Counters for the running orchestrator
#[derive(Debug, Default)]
pub struct OrchestratorStats {
    pub tenants_processed: AtomicU64,
    pub tenants_skipped: AtomicU64,
    pub worker_failures: AtomicU64,
}

/// Top-level dispatch loop for one fleet member
pub struct Orchestrator {
    fetcher: Arc<dyn TenantFetcher>,
    collector: Arc<dyn Collector>,
    registry: RatingRegistry,
    pipeline: RatingPipeline,
    store: Arc<CommitEngine>,
    coord: Arc<dyn Coordinator>,
    commands: Arc<RatingCommandState>,
    clock: PeriodClock,
    services: Vec<String>,
    stats: OrchestratorStats,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fetcher: Arc<dyn TenantFetcher>,
        collector: Arc<dyn Collector>,
        registry: RatingRegistry,
        store: Arc<CommitEngine>,
        coord: Arc<dyn Coordinator>,
        clock: PeriodClock,
        services: Vec<String>,
    ) -> Self {
        let pipeline = registry.build_pipeline();
        Self {
            fetcher,
            collector,
            registry,
            pipeline,
            store,
            coord,
            commands: Arc::new(RatingCommandState::new()),
            clock,
            services,
            stats: OrchestratorStats::default(),
        }
    }

    /// Wire the registries from settings and start the coordination client.
    ///
    /// A collector with a missing transformer dependency fails here, before
    /// any lock is taken.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate()?;

        let transformers = TransformerSet::with_defaults();
        let collector =
            CollectorRegistry::with_defaults().build(&settings.collect.collector, &transformers)?;

        let backend = StorageRegistry::with_defaults().build(&settings.storage)?;
        let store = Arc::new(CommitEngine::new(backend, settings.collect.period));

        let member_id = Uuid::new_v4().to_string();
        let coord = get_coordinator(&settings.orchestrator.coordination_url, &member_id)?;
        coord.start().await?;

        let fetcher = FetcherRegistry::with_defaults().build(&settings.fetcher)?;

        Ok(Self::new(
            fetcher,
            collector,
            RatingRegistry::with_defaults(),
            store,
            coord,
            PeriodClock::new(settings.collect.period, settings.collect.wait_periods),
            settings.collect.services.clone(),
        ))
    }

    /// Command state mutated by the external RPC surface
    pub fn commands(&self) -> Arc<RatingCommandState> {
        self.commands.clone()
    }

    pub fn stats(&self) -> &OrchestratorStats {
        &self.stats
    }

    pub fn store(&self) -> Arc<CommitEngine> {
        self.store.clone()
    }

    fn lock_name(tenant_id: &str) -> String {
        format!("tollgate-{}", tenant_id)
    }

    /// Drain pending rating-module commands and apply them to the registry
    fn process_messages(&mut self) {
        let mut dirty = false;

        for (name, enabled) in self.commands.drain_module_state() {
            if self.registry.set_enabled(&name, enabled) {
                info!(module = %name, enabled, "rating module state changed");
                dirty = true;
            } else {
                warn!(module = %name, "state change for unknown rating module");
            }
        }

        let reloads = self.commands.drain_reload_list();
        if !reloads.is_empty() || self.commands.take_global_reload() {
            dirty = true;
        }

        if dirty {
            self.pipeline = self.registry.build_pipeline();
            info!(processors = self.pipeline.len(), "rating pipeline rebuilt");
        }
    }

    async fn check_state(&self, tenant_id: &str) -> Result<Option<i64>> {
        let last = self.store.get_state(Some(tenant_id)).await?;
        Ok(self.clock.next_ready(last, utcnow_ts()))
    }

    /// Run a worker for one locked tenant.
    ///
    /// Returns false when the tenant has nothing ready and should leave the
    /// working set for this cycle.
    async fn process_tenant(&self, tenant_id: &str) -> Result<bool> {
        if self.check_state(tenant_id).await?.is_none() {
            return Ok(false);
        }

        let worker = Worker::new(
            self.collector.clone(),
            self.pipeline.clone(),
            self.store.clone(),
            self.clock,
            self.services.clone(),
            tenant_id.to_string(),
        );
        worker.run().await?;
        Ok(true)
    }

    /// One pass over the working set.
    ///
    /// Not-ready tenants are removed; lock-contended tenants stay for the
    /// next pass. The lock is released on every exit path, including worker
    /// errors, and liveness is refreshed after every tenant attempt.
    pub async fn dispatch_pass(&mut self, tenants: &mut Vec<String>) -> Result<()> {
        let mut finished: Vec<String> = Vec::new();

        for tenant in tenants.clone() {
            let lock = self.coord.get_lock(&Self::lock_name(&tenant));
            if lock.try_acquire().await? {
                let outcome = self.process_tenant(&tenant).await;
                if let Err(err) = lock.release().await {
                    warn!(tenant_id = %tenant, error = %err, "failed to release tenant lock");
                }
                match outcome {
                    Ok(true) => {
                        self.stats.tenants_processed.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(false) => finished.push(tenant.clone()),
                    Err(err) => {
                        // The lock was released without advancing state; the
                        // next cycle retries the same period.
                        self.stats.worker_failures.fetch_add(1, Ordering::Relaxed);
                        error!(tenant_id = %tenant, error = %err, "tenant processing failed");
                    }
                }
            } else {
                self.stats.tenants_skipped.fetch_add(1, Ordering::Relaxed);
                debug!(tenant_id = %tenant, "tenant locked by another fleet member");
            }
            self.coord.heartbeat().await?;
        }

        tenants.retain(|t| !finished.contains(t));
        Ok(())
    }

    /// One LIST + DISPATCH cycle: drain commands, load and shuffle the
    /// tenant list, then dispatch until the working set drains.
    pub async fn run_cycle(&mut self) -> Result<()> {
        self.process_messages();

        let mut tenants = self.fetcher.get_tenants().await?;
        tenants.shuffle(&mut rand::thread_rng());
        debug!(count = tenants.len(), "loaded tenant list");

        while !tenants.is_empty() {
            self.dispatch_pass(&mut tenants).await?;
            if !tenants.is_empty() {
                // Remaining tenants are contended or freshly processed
                tokio::time::sleep(CONTENTION_BACKOFF).await;
            }
        }
        Ok(())
    }

    /// Run forever; terminated externally via [`Orchestrator::terminate`]
    pub async fn process(&mut self) -> Result<()> {
        info!("orchestrator started");
        loop {
            self.run_cycle().await?;
            tokio::time::sleep(Duration::from_secs(self.clock.period().max(1) as u64)).await;
        }
    }

    /// Stop the coordination client, releasing any held locks
    pub async fn terminate(&self) -> Result<()> {
        self.coord.stop().await
    }
}
