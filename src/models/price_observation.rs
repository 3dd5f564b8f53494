use chrono::{DateTime, Duration, SubsecRound, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::currency::ExchangeRates;
use crate::models::{Availability, generate_id};

/// One immutable price fact for a product on a platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceObservation {
    pub id: String,
    pub product_id: String,
    pub platform_id: String,
    pub price: Decimal,
    pub currency: String,
    pub source_url: String,
    pub availability: Availability,
    pub seller_name: Option<String>,
    pub quantity_available: Option<u32>,
    pub captured_at: DateTime<Utc>,
}

/// Fields of an observation before it is stamped with an id and capture time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewObservation {
    pub product_id: String,
    pub platform_id: String,
    pub price: Decimal,
    pub currency: String,
    pub source_url: String,
    pub availability: Availability,
    pub seller_name: Option<String>,
    pub quantity_available: Option<u32>,
}

/// Row of the latest-price view: the newest observation of one platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LatestPrice {
    pub platform_name: String,
    pub observation: PriceObservation,
}

impl PriceObservation {
    pub fn new(new_observation: NewObservation) -> Self {
        Self {
            id: generate_id(),
            product_id: new_observation.product_id,
            platform_id: new_observation.platform_id,
            price: new_observation.price,
            currency: new_observation.currency,
            source_url: new_observation.source_url,
            availability: new_observation.availability,
            seller_name: new_observation.seller_name,
            quantity_available: new_observation.quantity_available,
            // Stored with microsecond precision
            captured_at: Utc::now().trunc_subsecs(6),
        }
    }

    pub fn price_in_base(&self, rates: &ExchangeRates) -> Decimal {
        rates.to_base(self.price, &self.currency)
    }

    /// `RM 467.00 (USD 100.00)`, or just the base amount for base-currency rows.
    pub fn price_display(&self, rates: &ExchangeRates) -> String {
        rates.display_with_original(self.price, &self.currency)
    }

    /// An age too large to subtract from `now` makes nothing stale.
    pub fn is_stale(&self, max_age_hours: i64, now: DateTime<Utc>) -> bool {
        Duration::try_hours(max_age_hours)
            .and_then(|max_age| now.checked_sub_signed(max_age))
            .is_some_and(|cutoff| self.captured_at < cutoff)
    }
}
