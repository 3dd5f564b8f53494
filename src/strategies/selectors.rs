use regex::Regex;
use rust_decimal::Decimal;
use scraper::{Html, Selector};
use std::str::FromStr;
use std::sync::LazyLock;

use crate::models::Availability;

static PRICE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?").expect("price pattern is valid")
});

static QUANTITY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s*(?:units?|pcs|pieces|items?)?\s*(?:available|left|remaining)")
        .expect("quantity pattern is valid")
});

/// Symbol -> code, longest symbols first so `US$` wins over `$`.
const CURRENCY_SYMBOLS: &[(&str, &str)] = &[
    ("US $", "USD"),
    ("AU $", "AUD"),
    ("US$", "USD"),
    ("AU$", "AUD"),
    ("A$", "AUD"),
    ("S$", "SGD"),
    ("RM", "MYR"),
    ("£", "GBP"),
    ("€", "EUR"),
    ("¥", "CNY"),
];

/// First number in `text`, thousands separators removed.
pub fn parse_price_text(text: &str) -> Option<Decimal> {
    let found = PRICE_REGEX.find(text)?;
    Decimal::from_str(&found.as_str().replace(',', "")).ok()
}

/// Currency code from a symbol in `text`. A bare `$` means the platform's
/// own dollar, so it resolves to `default`.
pub fn infer_currency(text: &str, default: &str) -> String {
    CURRENCY_SYMBOLS
        .iter()
        .find(|(symbol, _)| text.contains(symbol))
        .map(|(_, code)| code.to_string())
        .unwrap_or_else(|| default.to_string())
}

/// Text of the first candidate selector that matches a non-empty element.
pub fn first_text(document: &Html, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|candidate| Selector::parse(candidate).ok())
        .find_map(|selector| {
            document
                .select(&selector)
                .map(|element| element.text().collect::<Vec<_>>().join(" ").trim().to_string())
                .find(|text| !text.is_empty())
        })
}

/// Stock label from free status text, or `default` when the text says nothing
/// recognisable.
pub fn availability_from(text: Option<&str>, default: Availability) -> Availability {
    match text.map(Availability::infer) {
        Some(Availability::Unknown) | None => default,
        Some(inferred) => inferred,
    }
}

/// "Only 3 left", "12 available" -> the count.
pub fn quantity_hint(text: &str) -> Option<u32> {
    QUANTITY_REGEX
        .captures(text)
        .and_then(|captures| captures.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Price from a JSON value that may be a number or a numeric string.
pub fn json_price(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        serde_json::Value::String(s) => parse_price_text(s),
        _ => None,
    }
}
