//! Pass-through rating module

use rust_decimal::Decimal;

use tollgate_common::UsageFrame;

use crate::RatingProcessor;

/// Attaches an explicit zero price to any item earlier modules left unrated.
///
/// Runs at the lowest priority so every committed line carries a price.
pub struct NoopRating;

impl RatingProcessor for NoopRating {
    fn name(&self) -> &str {
        "noop"
    }

    fn priority(&self) -> u32 {
        1
    }

    fn process(&self, frames: &mut [UsageFrame]) {
        for frame in frames {
            for items in frame.usage.values_mut() {
                for item in items {
                    if item.rating.is_none() {
                        *item = item.clone().with_price(Decimal::ZERO);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use tollgate_common::{Period, UsageItem};

    #[test]
    fn test_noop_only_fills_unrated_items() {
        let mut frames = vec![UsageFrame::new(Period::starting_at(0, 3600)).with_service(
            "compute",
            vec![
                UsageItem::new(json!({}), dec!(1), "instance"),
                UsageItem::new(json!({}), dec!(1), "instance").with_price(dec!(0.42)),
            ],
        )];

        NoopRating.process(&mut frames);

        let items = &frames[0].usage["compute"];
        assert_eq!(items[0].rating.as_ref().map(|r| r.price), Some(dec!(0)));
        assert_eq!(items[1].price(), dec!(0.42));
    }
}
