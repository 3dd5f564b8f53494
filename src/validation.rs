use rust_decimal::Decimal;
use std::borrow::Cow;
use tracing::warn;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::models::{Availability, Platform};
use crate::strategies::RawPriceData;

pub const MAX_PRICE: Decimal = Decimal::from_parts(99_999_999_999u64 as u32, (99_999_999_999u64 >> 32) as u32, 0, false, 2);
pub const MAX_AVAILABILITY_LEN: usize = 50;
pub const MAX_SELLER_LEN: usize = 200;

#[derive(Debug, Validate)]
struct PriceFields {
    #[validate(custom(function = "validate_price_range"))]
    price: Decimal,
    #[validate(length(min = 1, max = 10, message = "currency must be between 1 and 10 characters"))]
    currency: String,
}

fn validate_price_range(price: &Decimal) -> Result<(), ValidationError> {
    if *price > Decimal::ZERO && *price <= MAX_PRICE {
        return Ok(());
    }

    let mut error = ValidationError::new("price_range");
    error.message = Some(Cow::Owned(format!("price {} outside (0, {}]", price, MAX_PRICE)));
    Err(error)
}

/// Fields of an observation that passed the validation rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPrice {
    pub price: Decimal,
    pub currency: String,
    pub availability: Availability,
    pub seller_name: Option<String>,
    pub quantity_available: Option<u32>,
}

fn describe(errors: &ValidationErrors) -> String {
    let mut reasons: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, field_errors)| {
            field_errors.iter().map(move |e| match &e.message {
                Some(message) => message.to_string(),
                None => format!("{} is invalid ({})", field, e.code),
            })
        })
        .collect();
    reasons.sort();
    reasons.join("; ")
}

fn truncate(value: &str, max_chars: usize, field: &str) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    warn!("{} too long, truncating to {} characters: {}", field, max_chars, value);
    value.chars().take(max_chars).collect()
}

/// Price and currency are hard rules, retried by the caller on failure.
/// Over-long availability or seller text is truncated with a warning.
pub fn validate(raw: &RawPriceData, platform: &Platform) -> Result<ValidatedPrice, String> {
    let currency = match raw.currency.trim() {
        "" => platform.currency.trim().to_uppercase(),
        code => code.to_uppercase(),
    };

    let fields = PriceFields {
        price: raw.price.round_dp(2),
        currency,
    };
    fields.validate().map_err(|e| describe(&e))?;

    let availability = truncate(raw.availability.trim(), MAX_AVAILABILITY_LEN, "Availability");
    let seller = truncate(raw.seller_name.trim(), MAX_SELLER_LEN, "Seller name");

    Ok(ValidatedPrice {
        price: fields.price,
        currency: fields.currency,
        availability: Availability::infer(&availability),
        seller_name: (!seller.is_empty()).then_some(seller),
        quantity_available: raw.quantity_available,
    })
}
