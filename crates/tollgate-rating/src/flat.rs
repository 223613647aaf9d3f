//! Flat per-service rate table

use std::collections::HashMap;

use rust_decimal::Decimal;

use tollgate_common::UsageFrame;

use crate::RatingProcessor;

/// Prices usage as `qty * rate`, with one rate per service.
///
/// Services without a configured rate fall back to the default rate.
pub struct FlatRating {
    rates: HashMap<String, Decimal>,
    default_rate: Decimal,
}

impl FlatRating {
    pub fn new(default_rate: Decimal) -> Self {
        Self {
            rates: HashMap::new(),
            default_rate,
        }
    }

    pub fn with_rate(mut self, service: impl Into<String>, rate: Decimal) -> Self {
        self.rates.insert(service.into(), rate);
        self
    }

    fn rate_for(&self, service: &str) -> Decimal {
        self.rates
            .get(service)
            .copied()
            .unwrap_or(self.default_rate)
    }
}

impl Default for FlatRating {
    fn default() -> Self {
        Self::new(Decimal::ONE)
    }
}

impl RatingProcessor for FlatRating {
    fn name(&self) -> &str {
        "flat"
    }

    fn priority(&self) -> u32 {
        100
    }

    fn process(&self, frames: &mut [UsageFrame]) {
        for frame in frames {
            for (service, items) in frame.usage.iter_mut() {
                let rate = self.rate_for(service);
                for item in items {
                    *item = item.clone().with_price(item.qty * rate);
                }
            }
        }
    }
}
