use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{generate_id, slugify};

/// A tracked product. Owns its price observations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: String,
    pub name: String,
    /// Generated once at creation, never recomputed.
    pub slug: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub is_active: Option<bool>,
}

impl Product {
    /// Builds a product with the given (already unique) slug.
    pub fn new(new_product: NewProduct, slug: String) -> Self {
        Self {
            id: generate_id(),
            name: new_product.name,
            slug,
            is_active: new_product.is_active.unwrap_or(true),
            created_at: Utc::now(),
        }
    }

    /// Picks the first free slug for `name`: `base`, `base-1`, `base-2`, ...
    pub fn unique_slug<F>(name: &str, mut taken: F) -> String
    where
        F: FnMut(&str) -> bool,
    {
        let base = slugify(name);
        if !taken(&base) {
            return base;
        }

        let mut suffix = 1;
        loop {
            let candidate = format!("{}-{}", base, suffix);
            if !taken(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }
}
