use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::models::{
    Availability, LatestPrice, NewObservation, NewPlatform, NewProduct, Platform, PriceObservation, Product,
};
use crate::utils::error::{AppError, Result};

/// Fixed-width so text ordering in SQL is time ordering.
fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Internal(format!("Corrupt timestamp '{}': {}", raw, e)))
}

fn platform_from_row(row: &SqliteRow) -> Result<Platform> {
    Ok(Platform {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        base_url: row.try_get("base_url")?,
        currency: row.try_get("currency")?,
        is_active: row.try_get("is_active")?,
        scraping_delay: row.try_get::<i64, _>("scraping_delay")?.clamp(0, i64::from(u32::MAX)) as u32,
        created_at: decode_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn product_from_row(row: &SqliteRow) -> Result<Product> {
    Ok(Product {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        is_active: row.try_get("is_active")?,
        created_at: decode_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn observation_from_row(row: &SqliteRow) -> Result<PriceObservation> {
    let price: String = row.try_get("price")?;
    let availability: String = row.try_get("availability")?;
    let quantity: Option<i64> = row.try_get("quantity_available")?;

    Ok(PriceObservation {
        id: row.try_get("id")?,
        product_id: row.try_get("product_id")?,
        platform_id: row.try_get("platform_id")?,
        price: Decimal::from_str(&price)
            .map_err(|e| AppError::Internal(format!("Corrupt price '{}': {}", price, e)))?,
        currency: row.try_get("currency")?,
        source_url: row.try_get("source_url")?,
        availability: Availability::from_label(&availability).unwrap_or_default(),
        seller_name: row.try_get("seller_name")?,
        quantity_available: quantity.and_then(|q| u32::try_from(q).ok()),
        captured_at: decode_ts(&row.try_get::<String, _>("captured_at")?)?,
    })
}

fn latest_from_row(row: &SqliteRow) -> Result<LatestPrice> {
    Ok(LatestPrice {
        platform_name: row.try_get("platform_name")?,
        observation: observation_from_row(row)?,
    })
}

/// Platforms, products, target URLs and the append-only observation log.
#[derive(Clone)]
pub struct ObservationStore {
    pool: SqlitePool,
}

impl ObservationStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let path = config
            .url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        if !path.starts_with(':') {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.acquire_timeout))
            .connect_with(options)
            .await?;

        info!("Connected to database {}", config.url);
        Ok(Self { pool })
    }

    /// Migrated private in-memory database on a single pinned connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        debug!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create_platform(&self, new_platform: NewPlatform) -> Result<Platform> {
        if new_platform.name.trim().is_empty() {
            return Err(AppError::Validation("Platform name must not be blank".into()));
        }

        let platform = Platform::new(new_platform);
        sqlx::query(
            r"
            INSERT INTO platforms (id, name, base_url, currency, is_active, scraping_delay, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&platform.id)
        .bind(&platform.name)
        .bind(&platform.base_url)
        .bind(&platform.currency)
        .bind(platform.is_active)
        .bind(i64::from(platform.scraping_delay))
        .bind(encode_ts(&platform.created_at))
        .execute(&self.pool)
        .await?;

        info!(platform = %platform.name, "Created platform");
        Ok(platform)
    }

    pub async fn create_product(&self, new_product: NewProduct) -> Result<Product> {
        if new_product.name.trim().is_empty() {
            return Err(AppError::Validation("Product name must not be blank".into()));
        }

        let taken: HashSet<String> = sqlx::query("SELECT slug FROM products")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| row.try_get::<String, _>("slug"))
            .collect::<std::result::Result<_, _>>()?;

        let slug = Product::unique_slug(&new_product.name, |candidate| taken.contains(candidate));
        let product = Product::new(new_product, slug);

        sqlx::query("INSERT INTO products (id, name, slug, is_active, created_at) VALUES (?, ?, ?, ?, ?)")
            .bind(&product.id)
            .bind(&product.name)
            .bind(&product.slug)
            .bind(product.is_active)
            .bind(encode_ts(&product.created_at))
            .execute(&self.pool)
            .await?;

        info!(product = %product.name, slug = %product.slug, "Created product");
        Ok(product)
    }

    /// By id or slug.
    pub async fn get_product(&self, key: &str) -> Result<Product> {
        let row = sqlx::query("SELECT * FROM products WHERE id = ? OR slug = ? LIMIT 1")
            .bind(key)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => product_from_row(&row),
            None => Err(AppError::NotFound {
                resource: format!("product '{}'", key),
            }),
        }
    }

    pub async fn active_products(&self) -> Result<Vec<Product>> {
        sqlx::query("SELECT * FROM products WHERE is_active = 1 ORDER BY created_at, rowid")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(product_from_row)
            .collect()
    }

    pub async fn active_platforms(&self) -> Result<Vec<Platform>> {
        sqlx::query("SELECT * FROM platforms WHERE is_active = 1 ORDER BY created_at, rowid")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(platform_from_row)
            .collect()
    }

    /// Active platforms whose name contains `filter`, ignoring case.
    pub async fn platforms_matching(&self, filter: &str) -> Result<Vec<Platform>> {
        let needle = filter.trim().to_lowercase();
        Ok(self
            .active_platforms()
            .await?
            .into_iter()
            .filter(|platform| platform.name.to_lowercase().contains(&needle))
            .collect())
    }

    pub async fn platform_by_name(&self, name: &str) -> Result<Platform> {
        let row = sqlx::query("SELECT * FROM platforms WHERE name = ? COLLATE NOCASE LIMIT 1")
            .bind(name.trim())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => platform_from_row(&row),
            None => Err(AppError::NotFound {
                resource: format!("platform '{}'", name),
            }),
        }
    }

    pub async fn set_target_url(&self, product_id: &str, platform_id: &str, url: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO product_targets (product_id, platform_id, url, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (product_id, platform_id) DO UPDATE SET url = excluded.url, updated_at = excluded.updated_at
            ",
        )
        .bind(product_id)
        .bind(platform_id)
        .bind(url)
        .bind(encode_ts(&Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Where to scrape the pair: the configured target, else the last URL
    /// an observation was captured from.
    pub async fn target_url(&self, product_id: &str, platform_id: &str) -> Result<Option<String>> {
        let configured: Option<String> =
            sqlx::query_scalar("SELECT url FROM product_targets WHERE product_id = ? AND platform_id = ?")
                .bind(product_id)
                .bind(platform_id)
                .fetch_optional(&self.pool)
                .await?;

        if configured.is_some() {
            return Ok(configured);
        }

        let observed: Option<String> = sqlx::query_scalar(
            r"
            SELECT source_url FROM price_observations
            WHERE product_id = ? AND platform_id = ? AND source_url <> ''
            ORDER BY captured_at DESC, rowid DESC
            LIMIT 1
            ",
        )
        .bind(product_id)
        .bind(platform_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(observed)
    }

    /// Insert only. Each call is a new row, existing rows are never touched.
    pub async fn append(&self, new_observation: NewObservation) -> Result<PriceObservation> {
        let observation = PriceObservation::new(new_observation);
        self.insert(&observation).await?;
        Ok(observation)
    }

    /// Inserts an already-stamped observation, e.g. one imported with its
    /// original capture time.
    pub async fn insert(&self, observation: &PriceObservation) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO price_observations
                (id, product_id, platform_id, price, currency, source_url, availability,
                 seller_name, quantity_available, captured_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&observation.id)
        .bind(&observation.product_id)
        .bind(&observation.platform_id)
        .bind(observation.price.to_string())
        .bind(&observation.currency)
        .bind(&observation.source_url)
        .bind(observation.availability.as_str())
        .bind(&observation.seller_name)
        .bind(observation.quantity_available.map(i64::from))
        .bind(encode_ts(&observation.captured_at))
        .execute(&self.pool)
        .await?;

        metrics::counter!("observations_appended_total").increment(1);
        Ok(())
    }

    /// Newest observation per platform for the product, platforms in the
    /// order they were registered.
    pub async fn latest_prices(&self, product_id: &str) -> Result<Vec<LatestPrice>> {
        sqlx::query(
            r"
            SELECT o.*, p.name AS platform_name
            FROM price_observations o
            JOIN platforms p ON p.id = o.platform_id
            WHERE o.product_id = ?
              AND o.rowid = (
                  SELECT o2.rowid FROM price_observations o2
                  WHERE o2.product_id = o.product_id AND o2.platform_id = o.platform_id
                  ORDER BY o2.captured_at DESC, o2.rowid DESC
                  LIMIT 1
              )
            ORDER BY p.created_at, p.rowid
            ",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(latest_from_row)
        .collect()
    }

    /// Every observation captured since `since`, oldest first.
    pub async fn history(&self, product_id: &str, since: DateTime<Utc>) -> Result<Vec<LatestPrice>> {
        sqlx::query(
            r"
            SELECT o.*, p.name AS platform_name
            FROM price_observations o
            JOIN platforms p ON p.id = o.platform_id
            WHERE o.product_id = ? AND o.captured_at >= ?
            ORDER BY o.captured_at ASC, o.rowid ASC
            ",
        )
        .bind(product_id)
        .bind(encode_ts(&since))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(latest_from_row)
        .collect()
    }

    /// Latest observations of active products that are older than `max_age`.
    pub async fn stale_latest(&self, max_age: Duration, now: DateTime<Utc>) -> Result<Vec<(Product, LatestPrice)>> {
        let mut stale = Vec::new();

        for product in self.active_products().await? {
            for latest in self.latest_prices(&product.id).await? {
                if latest.observation.is_stale(max_age.num_hours(), now) {
                    stale.push((product.clone(), latest));
                }
            }
        }

        Ok(stale)
    }

    pub async fn observation_count(&self, product_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_observations WHERE product_id = ?")
            .bind(product_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Removes the product and, by cascade, its observations and targets.
    pub async fn delete_product(&self, product_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(product_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
