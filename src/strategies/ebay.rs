use rust_decimal::Decimal;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, warn};

use super::RawPriceData;
use super::selectors::{availability_from, first_text, infer_currency, json_price, parse_price_text, quantity_hint};
use crate::models::Availability;

pub const DEFAULT_CURRENCY: &str = "AUD";
pub const DEFAULT_SELLER: &str = "eBay Seller";

const PRICE_SELECTORS: &[&str] = &["span.ux-textspans", "div[itemprop=price]", "span.display-price"];
const SELLER_SELECTORS: &[&str] = &["span.ux-seller-section__item--seller", "a.seller-persona"];
const AVAILABILITY_SELECTORS: &[&str] = &["div.d-quantity__availability", "span.ux-qty"];

/// eBay Australia listing. Structured data wins over visible text.
pub fn parse(html: &str) -> Option<RawPriceData> {
    let document = Html::parse_document(html);

    let (price, currency) = match structured_offer(&document) {
        Some(offer) => offer,
        None => {
            let Some(price_text) = first_text(&document, PRICE_SELECTORS) else {
                warn!("eBay price not found in JSON-LD or page text");
                return None;
            };
            (parse_price_text(&price_text)?, infer_currency(&price_text, DEFAULT_CURRENCY))
        }
    };

    let availability_text = first_text(&document, AVAILABILITY_SELECTORS);

    Some(RawPriceData {
        price,
        currency,
        availability: availability_from(availability_text.as_deref(), Availability::Unknown).to_string(),
        seller_name: first_text(&document, SELLER_SELECTORS).unwrap_or_else(|| DEFAULT_SELLER.to_string()),
        quantity_available: availability_text.as_deref().and_then(quantity_hint),
    })
}

/// `offers.price` / `offers.priceCurrency` from the first JSON-LD block that
/// carries an offer.
fn structured_offer(document: &Html) -> Option<(Decimal, String)> {
    let selector = Selector::parse(r#"script[type="application/ld+json"]"#).ok()?;

    document.select(&selector).find_map(|script| {
        let raw = script.text().collect::<String>();
        let data: Value = match serde_json::from_str(&raw) {
            Ok(data) => data,
            Err(e) => {
                debug!("Skipping unparseable JSON-LD block: {}", e);
                return None;
            }
        };

        let candidates = match data {
            Value::Array(items) => items,
            other => vec![other],
        };

        candidates.iter().find_map(|item| {
            let offers = item.get("offers")?;
            let offer = match offers {
                Value::Array(list) => list.first()?,
                other => other,
            };

            let price = offer.get("price").and_then(json_price)?;
            let currency = offer
                .get("priceCurrency")
                .and_then(Value::as_str)
                .filter(|c| !c.trim().is_empty())
                .unwrap_or(DEFAULT_CURRENCY)
                .to_string();
            Some((price, currency))
        })
    })
}
