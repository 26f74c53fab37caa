//! # Offer Resolver
//!
//! Picks the effective product-level and category-level discount for a book.
//!
//! ## Tie-break
//! Creation-time overlap checks are not atomic, so two rows for the same
//! target can be effective at once. The winner is always:
//!
//! 1. highest `discount_percent`
//! 2. then lowest `id`
//!
//! The result depends only on the rows and `now`, never on row order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Percent;
use crate::types::{Offer, OfferTarget};

/// Resolved discount percentages for one book. Zero means no offer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedOffers {
    pub product_percent: Percent,
    pub category_percent: Percent,
}

/// Returns the winning effective offer for `(target, target_id)`.
pub fn winning_offer<'a>(
    offers: &'a [Offer],
    target: OfferTarget,
    target_id: i64,
    now: DateTime<Utc>,
) -> Option<&'a Offer> {
    offers
        .iter()
        .filter(|o| o.target == target && o.target_id == target_id && o.is_effective(now))
        .max_by(|a, b| {
            a.discount_percent
                .cmp(&b.discount_percent)
                // Reversed: among equal percents the LOWER id is the max.
                .then_with(|| b.id.cmp(&a.id))
        })
}

/// Resolves `(productOfferPercent, categoryOfferPercent)` for a book.
///
/// `offers` may contain rows for any targets; only those matching the book
/// or its category and effective at `now` are considered. Pure read.
pub fn resolve(offers: &[Offer], book_id: i64, category_id: i64, now: DateTime<Utc>) -> ResolvedOffers {
    let pick = |target, id| {
        winning_offer(offers, target, id, now)
            .map(|o| o.discount_percent)
            .unwrap_or_default()
    };

    ResolvedOffers {
        product_percent: pick(OfferTarget::Product, book_id),
        category_percent: pick(OfferTarget::Category, category_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 10, 12, 0, 0).unwrap()
    }

    fn offer(id: i64, target: OfferTarget, target_id: i64, pct: &str) -> Offer {
        Offer {
            id,
            target,
            target_id,
            discount_percent: Percent::parse(pct).unwrap(),
            start_date: now() - Duration::days(1),
            end_date: now() + Duration::days(1),
            active: true,
        }
    }

    #[test]
    fn test_no_offers_resolves_to_zero() {
        let resolved = resolve(&[], 1, 2, now());
        assert!(resolved.product_percent.is_zero());
        assert!(resolved.category_percent.is_zero());
    }

    #[test]
    fn test_product_and_category_resolved_independently() {
        let offers = vec![
            offer(1, OfferTarget::Product, 10, "15"),
            offer(2, OfferTarget::Category, 3, "5"),
            offer(3, OfferTarget::Product, 11, "50"),
            offer(4, OfferTarget::Category, 4, "40"),
        ];
        let resolved = resolve(&offers, 10, 3, now());
        assert_eq!(resolved.product_percent, Percent::parse("15").unwrap());
        assert_eq!(resolved.category_percent, Percent::parse("5").unwrap());
    }

    #[test]
    fn test_highest_percent_wins_overlap() {
        let offers = vec![
            offer(1, OfferTarget::Product, 10, "10"),
            offer(2, OfferTarget::Product, 10, "25"),
            offer(3, OfferTarget::Product, 10, "20"),
        ];
        let winner = winning_offer(&offers, OfferTarget::Product, 10, now()).unwrap();
        assert_eq!(winner.id, 2);
    }

    #[test]
    fn test_equal_percent_lowest_id_wins_regardless_of_order() {
        let forward = vec![
            offer(4, OfferTarget::Category, 3, "30"),
            offer(9, OfferTarget::Category, 3, "30"),
        ];
        let mut backward = forward.clone();
        backward.reverse();

        for offers in [forward, backward] {
            let winner = winning_offer(&offers, OfferTarget::Category, 3, now()).unwrap();
            assert_eq!(winner.id, 4);
        }
    }

    #[test]
    fn test_inactive_and_out_of_window_are_ignored() {
        let mut inactive = offer(1, OfferTarget::Product, 10, "90");
        inactive.active = false;
        let mut expired = offer(2, OfferTarget::Product, 10, "80");
        expired.end_date = now();
        let mut future = offer(3, OfferTarget::Product, 10, "70");
        future.start_date = now() + Duration::seconds(1);
        let live = offer(4, OfferTarget::Product, 10, "5");

        let resolved = resolve(&[inactive, expired, future, live], 10, 3, now());
        assert_eq!(resolved.product_percent, Percent::parse("5").unwrap());
    }
}
