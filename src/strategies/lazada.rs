use scraper::Html;
use tracing::warn;

use super::RawPriceData;
use super::selectors::{availability_from, first_text, parse_price_text, quantity_hint};
use crate::models::Availability;

pub const DEFAULT_CURRENCY: &str = "MYR";

const PRICE_SELECTORS: &[&str] = &[
    "span.pdp-price_type_normal",
    "span.pdp-product-price",
    "span.price",
];
const STOCK_SELECTORS: &[&str] = &["div.stock-status", "span.stock"];
const SELLER_SELECTORS: &[&str] = &["a.seller-name", "div.seller-info"];

/// Lazada Malaysia product page. Prices are always ringgit.
pub fn parse(html: &str) -> Option<RawPriceData> {
    let document = Html::parse_document(html);

    let Some(price_text) = first_text(&document, PRICE_SELECTORS) else {
        warn!("Lazada price selector not found");
        return None;
    };
    let price = parse_price_text(&price_text)?;

    let stock_text = first_text(&document, STOCK_SELECTORS);
    let availability = availability_from(stock_text.as_deref(), Availability::InStock);

    Some(RawPriceData {
        price,
        currency: DEFAULT_CURRENCY.to_string(),
        availability: availability.to_string(),
        seller_name: first_text(&document, SELLER_SELECTORS).unwrap_or_default(),
        quantity_available: stock_text.as_deref().and_then(quantity_hint),
    })
}
