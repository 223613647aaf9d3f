//! # Tollgate Orchestrator
//!
//! The control plane of the rating pipeline: fleet-wide tenant locking
//! ([`coordination`]), the per-tenant [`worker`] loop, the top-level
//! [`orchestrator`] dispatch cycle, the rating-module command state
//! ([`endpoint`]), and tenant discovery ([`fetcher`]).
//!
//! Multiple processes run the same orchestrator loop concurrently; the
//! per-tenant distributed lock is the only cross-process mutual exclusion,
//! and it is held for the full duration of a tenant's worker run.

pub mod coordination;
pub mod endpoint;
pub mod fetcher;
pub mod orchestrator;
pub mod worker;

pub use coordination::{get_coordinator, Coordinator, DistributedLock, MemoryCoordinator};
pub use endpoint::RatingCommandState;
pub use fetcher::{FetcherRegistry, StaticFetcher, TenantFetcher};
pub use orchestrator::Orchestrator;
pub use worker::Worker;
