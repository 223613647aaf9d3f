//! Core data model: periods, usage frames, committed lines, invoices

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Service tag reserved for the synthetic marker row written when a period
/// produced no usage. Hidden from frame queries unless explicitly requested.
pub const NO_DATA_SERVICE: &str = "_NO_DATA_";

/// Half-open time interval [begin, end) covered by one rating period.
///
/// Timestamps are unix seconds. Invariant: `end = begin + period_length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub begin: i64,
    pub end: i64,
}

impl Period {
    pub fn new(begin: i64, end: i64) -> Self {
        Self { begin, end }
    }

    /// Period of the given length starting at `begin`
    pub fn starting_at(begin: i64, period_length: i64) -> Self {
        Self {
            begin,
            end: begin + period_length,
        }
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.begin && ts < self.end
    }
}

/// Price attached to a usage item by the rating pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub price: Decimal,
}

impl Rating {
    pub fn new(price: Decimal) -> Self {
        Self { price }
    }
}

/// One metered usage sample: opaque resource metadata plus a measured volume.
///
/// Immutable once rated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageItem {
    /// Opaque resource metadata (flavor, image id, zone, ...)
    pub desc: serde_json::Value,
    pub qty: Decimal,
    pub unit: String,
    /// Attached by the rating pipeline; absent until rated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<Rating>,
}

impl UsageItem {
    pub fn new(desc: serde_json::Value, qty: Decimal, unit: impl Into<String>) -> Self {
        Self {
            desc,
            qty,
            unit: unit.into(),
            rating: None,
        }
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.rating = Some(Rating::new(price));
        self
    }

    /// Attached price, zero when the item has not been rated
    pub fn price(&self) -> Decimal {
        self.rating
            .as_ref()
            .map(|r| r.price)
            .unwrap_or(Decimal::ZERO)
    }
}

/// One period's collected usage, grouped by service name.
///
/// Produced by a collector, priced by the rating pipeline, then handed to the
/// commit engine. Owned by a single worker iteration, never shared across
/// tenants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageFrame {
    pub period: Period,
    pub usage: BTreeMap<String, Vec<UsageItem>>,
}

impl UsageFrame {
    pub fn new(period: Period) -> Self {
        Self {
            period,
            usage: BTreeMap::new(),
        }
    }

    pub fn with_service(mut self, service: impl Into<String>, items: Vec<UsageItem>) -> Self {
        self.usage.insert(service.into(), items);
        self
    }

    /// Total number of usage items across all services
    pub fn item_count(&self) -> usize {
        self.usage.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }
}

/// One committed priced line: (tenant, period, service, item). Write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatedRecord {
    pub tenant_id: String,
    pub begin: i64,
    pub end: i64,
    pub service: String,
    pub unit: String,
    pub qty: Decimal,
    pub price: Decimal,
    pub desc: serde_json::Value,
}

impl RatedRecord {
    /// Build a committed line from a rated usage item
    pub fn from_item(
        tenant_id: &str,
        begin: i64,
        end: i64,
        service: &str,
        item: UsageItem,
    ) -> Self {
        let price = item.price();
        Self {
            tenant_id: tenant_id.to_string(),
            begin,
            end,
            service: service.to_string(),
            unit: item.unit,
            qty: item.qty,
            price,
            desc: item.desc,
        }
    }

    /// Synthetic marker distinguishing "no usage" from "never processed"
    pub fn no_data_marker(tenant_id: &str, begin: i64, end: i64) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            begin,
            end,
            service: NO_DATA_SERVICE.to_string(),
            unit: "none".to_string(),
            qty: Decimal::ZERO,
            price: Decimal::ZERO,
            desc: serde_json::Value::Null,
        }
    }

    pub fn is_no_data_marker(&self) -> bool {
        self.service == NO_DATA_SERVICE
    }
}

/// Invoice payment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

impl Default for PaymentStatus {
    fn default() -> Self {
        PaymentStatus::Unpaid
    }
}

/// Derived billing document persisted beside the rated lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub invoice_id: String,
    pub tenant_id: String,
    pub tenant_name: String,
    /// Issue timestamp, unix seconds
    pub issued_at: i64,
    pub period_from: i64,
    pub period_to: i64,
    /// Itemized cost detail, opaque to the storage layer
    pub detail: serde_json::Value,
    pub total_cost: Decimal,
    pub paid_cost: Decimal,
    pub balance_cost: Decimal,
    pub payment_status: PaymentStatus,
}

/// Partial invoice update; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct InvoiceUpdate {
    pub total_cost: Option<Decimal>,
    pub paid_cost: Option<Decimal>,
    pub balance_cost: Option<Decimal>,
    pub payment_status: Option<PaymentStatus>,
}

impl InvoiceUpdate {
    /// Apply the update in place
    pub fn apply(&self, invoice: &mut InvoiceRecord) {
        if let Some(total) = self.total_cost {
            invoice.total_cost = total;
        }
        if let Some(paid) = self.paid_cost {
            invoice.paid_cost = paid;
        }
        if let Some(balance) = self.balance_cost {
            invoice.balance_cost = balance;
        }
        if let Some(status) = self.payment_status {
            invoice.payment_status = status;
        }
    }
}
