use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::config::CurrencyConfig;

/// Static rates to MYR. Live FX is deliberately not fetched.
const DEFAULT_RATES: &[(&str, &str)] = &[
    ("MYR", "1.0"),
    ("AUD", "3.18"),
    ("USD", "4.67"),
    ("SGD", "3.48"),
    ("CNY", "0.65"),
    ("EUR", "5.10"),
    ("GBP", "5.95"),
];

/// Currency code -> rate into the base currency.
#[derive(Debug, Clone)]
pub struct ExchangeRates {
    base: String,
    rates: HashMap<String, Decimal>,
}

impl Default for ExchangeRates {
    fn default() -> Self {
        let rates = DEFAULT_RATES
            .iter()
            .filter_map(|(code, rate)| Some((code.to_string(), Decimal::from_str(rate).ok()?)))
            .collect();

        Self {
            base: "MYR".to_string(),
            rates,
        }
    }
}

impl ExchangeRates {
    pub fn from_config(config: &CurrencyConfig) -> Self {
        let mut table = Self::default();
        table.base = table.normalize_code(&config.base);
        table.rates.insert(table.base.clone(), Decimal::ONE);

        for (code, rate) in &config.rates {
            match Decimal::from_str(&rate.to_string()) {
                Ok(rate) if rate > Decimal::ZERO => {
                    table.rates.insert(table.normalize_code(code), rate);
                }
                _ => warn!(code = %code, rate = %rate, "Ignoring non-positive exchange rate override"),
            }
        }

        table
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Upper-cased, trimmed code. `RM` is MYR and a blank code means the base.
    pub fn normalize_code(&self, code: &str) -> String {
        let code = code.trim().to_uppercase();
        match code.as_str() {
            "" => self.base.clone(),
            "RM" => "MYR".to_string(),
            _ => code,
        }
    }

    pub fn rate(&self, code: &str) -> Option<Decimal> {
        self.rates.get(&self.normalize_code(code)).copied()
    }

    /// Converts into the base currency. Unknown codes are treated 1:1 and
    /// logged rather than rejected.
    pub fn to_base(&self, amount: Decimal, code: &str) -> Decimal {
        let code = self.normalize_code(code);
        if code == self.base {
            return amount;
        }

        match self.rates.get(&code) {
            Some(rate) => {
                let converted = amount * rate;
                debug!("Converted {} {} to {} {} (rate: {})", amount, code, converted, self.base, rate);
                converted
            }
            None => {
                warn!("Unknown currency: {}, using 1:1 rate", code);
                amount
            }
        }
    }

    /// `RM 5,379.00` for MYR, `USD 12.00` style otherwise.
    pub fn format_base(&self, amount: Decimal) -> String {
        format!("{} {}", self.symbol(&self.base), group_thousands(amount))
    }

    pub fn display_with_original(&self, amount: Decimal, code: &str) -> String {
        let normalized = self.normalize_code(code);
        let base_display = self.format_base(self.to_base(amount, &normalized));
        if normalized == self.base {
            base_display
        } else {
            format!("{} ({} {})", base_display, code.trim(), group_thousands(amount))
        }
    }

    fn symbol<'a>(&self, code: &'a str) -> &'a str {
        if code == "MYR" { "RM" } else { code }
    }
}

/// Two decimals with comma thousands separators.
pub fn group_thousands(amount: Decimal) -> String {
    let fixed = format!("{:.2}", amount.round_dp(2));
    let (sign, digits) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed.as_str()),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    format!("{}{}.{}", sign, grouped, frac_part)
}
