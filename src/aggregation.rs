use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::currency::ExchangeRates;
use crate::models::LatestPrice;
use crate::store::ObservationStore;
use crate::utils::error::{AppError, Result};

/// Savings below or at this percentage are reported as minimal.
const SAVINGS_THRESHOLD: Decimal = Decimal::TEN;

/// Comparison over a product's latest-price view, in the base currency.
#[derive(Debug, Clone)]
pub struct PriceComparison<'a> {
    rates: &'a ExchangeRates,
    latest: Vec<LatestPrice>,
}

impl<'a> PriceComparison<'a> {
    pub fn new(latest: Vec<LatestPrice>, rates: &'a ExchangeRates) -> Self {
        Self { rates, latest }
    }

    pub async fn for_product(store: &ObservationStore, product_id: &str, rates: &'a ExchangeRates) -> Result<Self> {
        Ok(Self::new(store.latest_prices(product_id).await?, rates))
    }

    pub fn latest(&self) -> &[LatestPrice] {
        &self.latest
    }

    pub fn base_price(&self, entry: &LatestPrice) -> Decimal {
        entry.observation.price_in_base(self.rates)
    }

    /// The entry `better` prefers. On equal base prices the earlier entry
    /// wins, in both directions.
    fn pick(&self, better: Ordering) -> Option<&LatestPrice> {
        let mut best: Option<(&LatestPrice, Decimal)> = None;

        for entry in &self.latest {
            let price = self.base_price(entry);
            match best {
                Some((_, best_price)) if price.cmp(&best_price) != better => {}
                _ => best = Some((entry, price)),
            }
        }

        best.map(|(entry, _)| entry)
    }

    pub fn lowest(&self) -> Option<&LatestPrice> {
        self.pick(Ordering::Less)
    }

    pub fn highest(&self) -> Option<&LatestPrice> {
        self.pick(Ordering::Greater)
    }

    pub fn average(&self) -> Option<Decimal> {
        if self.latest.is_empty() {
            return None;
        }

        let total: Decimal = self.latest.iter().map(|entry| self.base_price(entry)).sum();
        Some(total / Decimal::from(self.latest.len()))
    }

    /// `(average - lowest) / average * 100`, only with two or more platforms.
    pub fn savings_percent(&self) -> Option<Decimal> {
        if self.latest.len() < 2 {
            return None;
        }

        let average = self.average()?;
        let lowest = self.base_price(self.lowest()?);
        if average <= Decimal::ZERO {
            return None;
        }

        Some((average - lowest) / average * Decimal::ONE_HUNDRED)
    }

    pub fn summary_text(&self) -> String {
        let Some(lowest) = self.lowest() else {
            return "No price data available.".to_string();
        };

        let mut summary = format!(
            "Current lowest price is {}, recommended to buy from {}.",
            summary_price(lowest.observation.price, &lowest.observation.currency),
            lowest.platform_name
        );

        if let Some(percent) = self.savings_percent() {
            if percent > SAVINGS_THRESHOLD {
                summary.push_str(&format!(" You can save approximately {:.1}%.", percent.round_dp(1)));
            } else {
                summary.push_str(" Price difference is minimal.");
            }
        }

        summary
    }
}

fn summary_price(price: Decimal, currency: &str) -> String {
    let price = price.round_dp(2);
    match currency.trim().to_uppercase().as_str() {
        "MYR" | "RM" | "" => format!("RM{:.2}", price),
        "USD" => format!("${:.2}", price),
        code => format!("{:.2} {}", price, code),
    }
}

/// One point of a platform's price line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub captured_at: DateTime<Utc>,
    pub price: Decimal,
    pub currency: String,
    pub price_in_base: Decimal,
}

/// Observations of the last `days` days grouped by platform name, each
/// group in capture order.
pub async fn history_by_platform(
    store: &ObservationStore,
    product_id: &str,
    days: i64,
    now: DateTime<Utc>,
    rates: &ExchangeRates,
) -> Result<BTreeMap<String, Vec<HistoryPoint>>> {
    let since = Duration::try_days(days)
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| AppError::Validation(format!("History window of {} days is out of range", days)))?;

    let history = store.history(product_id, since).await?;
    Ok(group_history(history, rates))
}

pub fn group_history(history: Vec<LatestPrice>, rates: &ExchangeRates) -> BTreeMap<String, Vec<HistoryPoint>> {
    let mut grouped: BTreeMap<String, Vec<HistoryPoint>> = BTreeMap::new();

    for entry in history {
        let observation = entry.observation;
        grouped.entry(entry.platform_name).or_default().push(HistoryPoint {
            captured_at: observation.captured_at,
            price_in_base: observation.price_in_base(rates),
            price: observation.price,
            currency: observation.currency,
        });
    }

    for points in grouped.values_mut() {
        points.sort_by_key(|point| point.captured_at);
    }

    grouped
}
