use regex::Regex;
use rust_decimal::Decimal;
use scraper::{Html, Selector};
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{debug, warn};

use super::RawPriceData;
use super::selectors::{availability_from, first_text, infer_currency, json_price, parse_price_text, quantity_hint};
use crate::models::Availability;

pub const DEFAULT_CURRENCY: &str = "USD";
pub const DEFAULT_SELLER: &str = "AliExpress Store";

static RUN_PARAMS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)data:\s*(\{.*?\})\s*\};").expect("runParams pattern is valid"));

const PRICE_SELECTORS: &[&str] = &["span.product-price-value", "span[itemprop=price]", "div.product-price"];
const SELLER_SELECTORS: &[&str] = &["a.shop-name", "span.shop-name"];
const STOCK_SELECTORS: &[&str] = &["span.product-quantity-info"];

pub fn parse(html: &str) -> Option<RawPriceData> {
    let document = Html::parse_document(html);

    let (price, currency) = match run_params_price(&document) {
        Some(found) => found,
        None => {
            let Some(price_text) = first_text(&document, PRICE_SELECTORS) else {
                warn!("AliExpress price not found in runParams or page text");
                return None;
            };
            (parse_price_text(&price_text)?, infer_currency(&price_text, DEFAULT_CURRENCY))
        }
    };

    let stock_text = first_text(&document, STOCK_SELECTORS);

    Some(RawPriceData {
        price,
        currency,
        availability: availability_from(stock_text.as_deref(), Availability::InStock).to_string(),
        seller_name: first_text(&document, SELLER_SELECTORS).unwrap_or_else(|| DEFAULT_SELLER.to_string()),
        quantity_available: stock_text.as_deref().and_then(quantity_hint),
    })
}

/// `priceModule.minActivityAmount`, else `priceModule.minAmount`, from the
/// `window.runParams` bootstrap script.
fn run_params_price(document: &Html) -> Option<(Decimal, String)> {
    let selector = Selector::parse("script").ok()?;

    document
        .select(&selector)
        .map(|script| script.text().collect::<String>())
        .filter(|body| body.contains("window.runParams"))
        .find_map(|body| {
            let captures = RUN_PARAMS_REGEX.captures(&body)?;
            let data: Value = match serde_json::from_str(captures.get(1)?.as_str()) {
                Ok(data) => data,
                Err(e) => {
                    debug!("Skipping unparseable runParams block: {}", e);
                    return None;
                }
            };

            let module = data.get("priceModule")?;
            ["minActivityAmount", "minAmount"].iter().find_map(|key| {
                let amount = module.get(*key)?;
                let price = amount.get("value").and_then(json_price)?;
                let currency = amount
                    .get("currency")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_CURRENCY)
                    .to_string();
                Some((price, currency))
            })
        })
}
