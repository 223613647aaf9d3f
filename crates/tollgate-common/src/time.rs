//! Unix-second time helpers and the period readiness gate

use chrono::{Datelike, TimeZone, Utc};

/// Current wall-clock time as a unix timestamp
pub fn utcnow_ts() -> i64 {
    Utc::now().timestamp()
}

/// Start of the calendar month containing `ts`, as a unix timestamp
pub fn month_start_ts(ts: i64) -> i64 {
    match Utc.timestamp_opt(ts, 0).single() {
        Some(dt) => Utc
            .with_ymd_and_hms(dt.year(), dt.month(), 1, 0, 0, 0)
            .single()
            .map(|m| m.timestamp())
            .unwrap_or(ts),
        None => ts,
    }
}

/// Start of the month after the one containing `ts`
pub fn next_month_start_ts(ts: i64) -> i64 {
    match Utc.timestamp_opt(ts, 0).single() {
        Some(dt) => {
            let (year, month) = if dt.month() == 12 {
                (dt.year() + 1, 1)
            } else {
                (dt.year(), dt.month() + 1)
            };
            Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
                .single()
                .map(|m| m.timestamp())
                .unwrap_or(ts)
        }
        None => ts,
    }
}

/// Readiness gate deciding whether a tenant has a period due for collection.
///
/// The sole scheduling decision in the pipeline: every worker iteration and
/// every orchestrator dispatch re-evaluates it, and it only advances after a
/// successful commit moves the persisted state forward.
#[derive(Debug, Clone, Copy)]
pub struct PeriodClock {
    period: i64,
    wait_periods: i64,
}

impl PeriodClock {
    pub fn new(period: i64, wait_periods: i64) -> Self {
        Self {
            period,
            wait_periods,
        }
    }

    /// Rating period length in seconds
    pub fn period(&self) -> i64 {
        self.period
    }

    /// Next period begin due for processing, given the last committed begin.
    ///
    /// Tenants with no committed state anchor to the start of the current
    /// calendar month. Otherwise the next period becomes due once the
    /// settling delay has fully elapsed, so the metering backend has had
    /// time to catch up.
    pub fn next_ready(&self, last_committed: Option<i64>, now: i64) -> Option<i64> {
        let Some(last) = last_committed else {
            return Some(month_start_ts(now));
        };
        let next = last + self.period;
        if next + self.wait_periods * self.period < now {
            Some(next)
        } else {
            None
        }
    }
}
