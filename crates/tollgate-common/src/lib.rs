//! # Tollgate Common
//!
//! Shared types, errors, time helpers, and configuration for the tollgate
//! usage-rating pipeline.
//!
//! ## Core Types
//!
//! - [`UsageFrame`]: one rating period's collected usage, grouped by service
//! - [`UsageItem`]: a single metered sample with quantity, unit, and price
//! - [`RatedRecord`]: one committed priced line, write-once
//! - [`PeriodClock`]: the readiness gate deciding when a period is due
//!
//! ## Errors
//!
//! [`TollgateError`] is the unified error type; [`CollectError`] and
//! [`StorageError`] carry the per-concern variants callers match on.

pub mod config;
pub mod error;
pub mod time;
pub mod types;

// Re-export commonly used types at crate root
pub use config::{CollectSettings, FetcherSettings, OrchestratorSettings, Settings, StorageSettings};
pub use error::{CollectError, Result, StorageError, TollgateError};
pub use time::{month_start_ts, next_month_start_ts, utcnow_ts, PeriodClock};
pub use types::{
    InvoiceRecord, InvoiceUpdate, PaymentStatus, Period, RatedRecord, Rating, UsageFrame,
    UsageItem, NO_DATA_SERVICE,
};

/// Tollgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default rating period length in seconds
pub const DEFAULT_PERIOD_SECS: i64 = 3600;

/// Default number of settling periods to wait before collecting
pub const DEFAULT_WAIT_PERIODS: i64 = 2;
