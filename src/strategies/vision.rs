use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};

use super::RawPriceData;
use super::fetcher::PageFetcher;
use super::inference::InferenceService;
use super::selectors::json_price;
use crate::browser::ScreenshotRequest;
use crate::models::Availability;
use crate::utils::ScrapeError;

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("trailing comma pattern is valid"));

const PROMPT_TEMPLATE: &str = r#"You are analyzing a product page screenshot{context}.

Extract the following information and return it as valid JSON:

1. "price": The current/sale price as a decimal number (e.g., 5499.00). Use the main SALE or CURRENT price, NOT the original or crossed-out price. This is usually the largest price displayed.

2. "currency": The currency code (e.g., "MYR", "RM", "USD", "AUD", "CNY", "SGD", "EUR", "GBP").

3. "availability": Stock status, usually directly below the price or near the "Add to Cart" / "Buy Now" button. Return ONE of:
   - "In Stock" for "In Stock", "Available", "X units available", "Ready to Ship", "Ships Today"
   - "Out of Stock" for "Out of Stock", "Sold Out", "Unavailable", "Notify Me"
   - "Pre-Order" for "Pre-Order", "Coming Soon"
   - "Limited Stock" for "Only X left", "Limited Quantity", "Low Stock", "Hurry, X remaining"
   - "Unknown" if no stock information is visible

4. "seller_name": The shop or seller name if visible.

5. "quantity_available": The number in text like "5 units left" or "Only 3 remaining", otherwise null.

Return ONLY valid JSON, no other text. Use null for anything you cannot find (availability must be "Unknown" instead). The price must be a number without currency symbols or commas.

Example:
{"price": 5499.00, "currency": "MYR", "availability": "In Stock", "seller_name": "Official Store", "quantity_available": null}

Now analyze this product page:"#;

pub fn build_prompt(product_name: Option<&str>) -> String {
    let context = product_name
        .map(|name| format!(" for product '{}'", name))
        .unwrap_or_default();
    PROMPT_TEMPLATE.replace("{context}", &context)
}

/// JSON body of a model reply: the inside of a ```json fence, else of any
/// fence, else the outermost braces.
fn json_body(reply: &str) -> Option<&str> {
    let reply = reply.trim();

    let fenced = reply
        .split_once("```json")
        .or_else(|| reply.split_once("```"))
        .map(|(_, rest)| rest.split("```").next().unwrap_or(rest).trim());

    let candidate = fenced.unwrap_or(reply);
    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    (start < end).then(|| &candidate[start..=end])
}

/// Parses a model reply into price data. Anything without a positive,
/// parseable price is rejected.
pub fn parse_vision_reply(reply: &str, default_currency: &str) -> Option<RawPriceData> {
    let Some(body) = json_body(reply) else {
        warn!("No JSON object in inference reply: {}", reply);
        return None;
    };

    let data: Value = match serde_json::from_str(body) {
        Ok(data) => data,
        Err(_) => match serde_json::from_str(&TRAILING_COMMA.replace_all(body, "$1")) {
            Ok(data) => data,
            Err(e) => {
                warn!("Inference reply is not valid JSON ({}): {}", e, body);
                return None;
            }
        },
    };

    let price = data.get("price").and_then(json_price).filter(|p| *p > Decimal::ZERO);
    let Some(price) = price else {
        warn!("Inference could not find a usable price: {}", data);
        return None;
    };

    let text_field = |key: &str| {
        data.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let quantity_available = data.get("quantity_available").and_then(|q| match q {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    });

    Some(RawPriceData {
        price,
        currency: text_field("currency").unwrap_or_else(|| default_currency.to_string()),
        availability: text_field("availability").unwrap_or_else(|| Availability::Unknown.to_string()),
        seller_name: text_field("seller_name").unwrap_or_default(),
        quantity_available,
    })
}

/// Screenshot plus vision model. Works on any storefront, no selectors.
pub struct VisionScraper {
    fetcher: PageFetcher,
    inference: Arc<dyn InferenceService>,
    default_currency: String,
}

impl VisionScraper {
    pub fn new(fetcher: PageFetcher, inference: Arc<dyn InferenceService>, default_currency: &str) -> Self {
        Self {
            fetcher,
            inference,
            default_currency: default_currency.to_string(),
        }
    }

    pub async fn scrape(&self, url: &str, product_name: Option<&str>) -> Result<Option<RawPriceData>, ScrapeError> {
        info!(url = %url, "Starting vision scrape");

        let screenshot = self.fetcher.screenshot(&ScreenshotRequest::for_url(url)).await?;
        let reply = self.inference.extract(&screenshot, &build_prompt(product_name)).await?;

        Ok(parse_vision_reply(&reply, &self.default_currency))
    }
}
