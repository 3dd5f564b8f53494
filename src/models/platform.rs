use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::generate_id;

/// An e-commerce site prices are collected from. Read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Platform {
    pub id: String,
    pub name: String,
    pub base_url: Option<String>,
    pub currency: String,
    pub is_active: bool,
    /// Minimum seconds between two requests to this platform.
    pub scraping_delay: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPlatform {
    pub name: String,
    pub base_url: Option<String>,
    pub currency: Option<String>,
    pub is_active: Option<bool>,
    pub scraping_delay: Option<u32>,
}

impl Platform {
    pub fn new(new_platform: NewPlatform) -> Self {
        Self {
            id: generate_id(),
            name: new_platform.name,
            base_url: new_platform.base_url,
            currency: new_platform
                .currency
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| "MYR".to_string()),
            is_active: new_platform.is_active.unwrap_or(true),
            scraping_delay: new_platform.scraping_delay.unwrap_or(2),
            created_at: Utc::now(),
        }
    }

    pub fn politeness_delay(&self) -> Duration {
        Duration::from_secs(u64::from(self.scraping_delay))
    }
}
