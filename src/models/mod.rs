use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod platform;
pub mod price_observation;
pub mod product;

pub use platform::*;
pub use price_observation::*;
pub use product::*;

/// Stock state recorded with every observation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Availability {
    #[serde(rename = "In Stock")]
    InStock,
    #[serde(rename = "Out of Stock")]
    OutOfStock,
    #[serde(rename = "Limited Stock")]
    LimitedStock,
    #[serde(rename = "Pre-Order")]
    PreOrder,
    #[default]
    #[serde(rename = "Unknown")]
    Unknown,
}

impl Availability {
    pub const ALL: [Availability; 5] = [
        Availability::InStock,
        Availability::OutOfStock,
        Availability::LimitedStock,
        Availability::PreOrder,
        Availability::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::InStock => "In Stock",
            Availability::OutOfStock => "Out of Stock",
            Availability::LimitedStock => "Limited Stock",
            Availability::PreOrder => "Pre-Order",
            Availability::Unknown => "Unknown",
        }
    }

    /// Exact (case-insensitive) match against the stored labels.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(label))
    }

    /// Keyword inference over free stock-status text such as
    /// "Only 3 left" or "Currently unavailable". Order matters: the
    /// negative phrases contain "available" too.
    pub fn infer(text: &str) -> Self {
        if let Some(exact) = Self::from_label(text) {
            return exact;
        }

        let text = text.to_lowercase();
        if ["out of stock", "sold out", "unavailable", "notify me"]
            .iter()
            .any(|k| text.contains(k))
        {
            Availability::OutOfStock
        } else if ["pre-order", "preorder", "coming soon"].iter().any(|k| text.contains(k)) {
            Availability::PreOrder
        } else if (text.contains("only") && text.contains("left"))
            || ["limited", "low stock", "remaining"].iter().any(|k| text.contains(k))
        {
            Availability::LimitedStock
        } else if ["in stock", "available", "ready to ship", "ships today"]
            .iter()
            .any(|k| text.contains(k))
        {
            Availability::InStock
        } else {
            Availability::Unknown
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Lower-case ASCII slug, runs of anything else collapse to one dash.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        "product".to_string()
    } else {
        slug
    }
}
