// Full runs and single-product scrapes through the batch coordinator.

use price_compare::batch::PlatformStatus;
use price_compare::models::{Availability, NewObservation};
use price_compare::orchestrator::ScrapeOutcome;
use price_compare::utils::AppError;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

use super::*;

const LAZADA_A: &str = "https://www.lazada.com.my/products/iphone-15-i100.html";
const LAZADA_B: &str = "https://www.lazada.com.my/products/galaxy-s24-i200.html";
const EBAY_A: &str = "https://www.ebay.com.au/itm/100";

#[tokio::test]
async fn test_run_all_skips_pairs_without_url() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let lazada = env.platform("Lazada", "MYR").await?;
    let ebay = env.platform("eBay AU", "AUD").await?;
    let iphone = env.product("iPhone 15").await?;
    let galaxy = env.product("Galaxy S24").await?;

    env.store.set_target_url(&iphone.id, &lazada.id, LAZADA_A).await?;
    env.store.set_target_url(&iphone.id, &ebay.id, EBAY_A).await?;
    env.store.set_target_url(&galaxy.id, &lazada.id, LAZADA_B).await?;
    // No eBay URL for the Galaxy

    env.renderer.serve(LAZADA_A, lazada_page("RM4,999.00"));
    env.renderer.serve(EBAY_A, ebay_page("1499.00", "AUD"));
    env.renderer.serve(LAZADA_B, lazada_page("RM3,899.00"));

    let summary = env.coordinator(1).run_all().await?;

    assert_eq!(summary.total_products, 2);
    assert_eq!(summary.scraped_products, 2);
    assert_eq!(summary.total_prices, 3);
    assert_eq!(summary.skipped_pairs, 1);
    assert_eq!(summary.failed_pairs, 0);
    assert!(summary.errors.is_empty(), "{:?}", summary.errors);
    assert_eq!(env.renderer.calls().len(), 3);

    assert_eq!(env.store.observation_count(&iphone.id).await?, 2);
    assert_eq!(env.store.observation_count(&galaxy.id).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_run_all_reports_partial_failure() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let lazada = env.platform("Lazada", "MYR").await?;
    let iphone = env.product("iPhone 15").await?;
    let galaxy = env.product("Galaxy S24").await?;

    env.store.set_target_url(&iphone.id, &lazada.id, LAZADA_A).await?;
    env.store.set_target_url(&galaxy.id, &lazada.id, LAZADA_B).await?;
    env.renderer.serve(LAZADA_A, empty_page());
    env.renderer.serve(LAZADA_B, lazada_page("RM3,899.00"));

    let summary = env.coordinator(2).run_all().await?;

    assert_eq!(summary.total_products, 2);
    assert_eq!(summary.scraped_products, 1);
    assert_eq!(summary.total_prices, 1);
    assert_eq!(summary.failed_pairs, 1);
    assert_eq!(env.store.observation_count(&iphone.id).await?, 0);
    assert_eq!(env.renderer.calls_to(LAZADA_A), 3);
    Ok(())
}

#[tokio::test]
async fn test_repeated_runs_only_append() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let lazada = env.platform("Lazada", "MYR").await?;
    let iphone = env.product("iPhone 15").await?;
    env.store.set_target_url(&iphone.id, &lazada.id, LAZADA_A).await?;

    env.renderer.serve(LAZADA_A, lazada_page("RM4,999.00"));
    env.coordinator(1).run_all().await?;
    let first = env.store.latest_prices(&iphone.id).await?.remove(0).observation;

    env.renderer.serve(LAZADA_A, lazada_page("RM4,799.00"));
    env.coordinator(1).run_all().await?;

    assert_eq!(env.store.observation_count(&iphone.id).await?, 2);
    let latest = env.store.latest_prices(&iphone.id).await?;
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].observation.price, Decimal::from_str("4799.00")?);

    let history = env.store.history(&iphone.id, first.captured_at).await?;
    assert_eq!(history[0].observation, first);
    Ok(())
}

#[tokio::test]
async fn test_last_observed_url_is_rescraped() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let lazada = env.platform("Lazada", "MYR").await?;
    let iphone = env.product("iPhone 15").await?;

    // Seeded by hand, as an operator would before targets existed
    env.store
        .append(NewObservation {
            product_id: iphone.id.clone(),
            platform_id: lazada.id.clone(),
            price: Decimal::from_str("5099.00")?,
            currency: "MYR".to_string(),
            source_url: LAZADA_A.to_string(),
            availability: Availability::InStock,
            seller_name: None,
            quantity_available: None,
        })
        .await?;
    env.renderer.serve(LAZADA_A, lazada_page("RM4,999.00"));

    let summary = env.coordinator(1).run_all().await?;

    assert_eq!(summary.total_prices, 1);
    assert_eq!(env.renderer.calls(), vec![LAZADA_A.to_string()]);
    assert_eq!(env.store.observation_count(&iphone.id).await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_worker_pool_scrapes_every_pair() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let lazada = env.platform("Lazada", "MYR").await?;
    let ebay = env.platform("eBay AU", "AUD").await?;

    let mut products = Vec::new();
    for i in 0..4 {
        let product = env.product(&format!("Headphones {}", i)).await?;
        let lazada_url = format!("https://www.lazada.com.my/products/headphones-i{}.html", i);
        let ebay_url = format!("https://www.ebay.com.au/itm/{}", 900 + i);

        env.store.set_target_url(&product.id, &lazada.id, &lazada_url).await?;
        env.store.set_target_url(&product.id, &ebay.id, &ebay_url).await?;
        env.renderer.serve(&lazada_url, lazada_page(&format!("RM{}99.00", i + 1)));
        env.renderer.serve(&ebay_url, ebay_page(&format!("{}9.95", i + 1), "AUD"));
        products.push(product);
    }

    let summary = env.coordinator(4).run_all().await?;

    assert_eq!(summary.total_products, 4);
    assert_eq!(summary.scraped_products, 4);
    assert_eq!(summary.total_prices, 8);
    for product in &products {
        assert_eq!(env.store.latest_prices(&product.id).await?.len(), 2);
    }
    Ok(())
}

#[tokio::test]
async fn test_one_request_in_flight_per_platform() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let lazada = env.platform("Lazada", "MYR").await?;
    let ebay = env.platform("eBay AU", "AUD").await?;
    env.renderer.slow_down(Duration::from_millis(50));

    for i in 0..4 {
        let product = env.product(&format!("Keyboard {}", i)).await?;
        let lazada_url = format!("https://www.lazada.com.my/products/keyboard-i{}.html", i);
        let ebay_url = format!("https://www.ebay.com.au/itm/{}", 700 + i);

        env.store.set_target_url(&product.id, &lazada.id, &lazada_url).await?;
        env.store.set_target_url(&product.id, &ebay.id, &ebay_url).await?;
        env.renderer.serve(&lazada_url, lazada_page("RM399.00"));
        env.renderer.serve(&ebay_url, ebay_page("119.00", "AUD"));
    }

    let summary = env.coordinator(4).run_all().await?;

    assert_eq!(summary.total_prices, 8);
    assert_eq!(env.renderer.max_concurrent_for_host("www.lazada.com.my"), 1);
    assert_eq!(env.renderer.max_concurrent_for_host("www.ebay.com.au"), 1);
    assert!(env.renderer.max_concurrent() > 1, "platforms never overlapped");
    Ok(())
}

#[tokio::test]
async fn test_unavailable_datastore_fails_the_run() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    env.product("iPhone 15").await?;
    env.store.pool().close().await;

    assert!(matches!(env.coordinator(1).run_all().await, Err(AppError::Database(_))));
    Ok(())
}

#[tokio::test]
async fn test_scrape_product_with_filter() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let lazada = env.platform("Lazada", "MYR").await?;
    let ebay = env.platform("eBay AU", "AUD").await?;
    let iphone = env.product("iPhone 15").await?;
    env.store.set_target_url(&iphone.id, &lazada.id, LAZADA_A).await?;
    env.store.set_target_url(&iphone.id, &ebay.id, EBAY_A).await?;
    env.renderer.serve(EBAY_A, ebay_page("1499.00", "AUD"));

    let reports = env.coordinator(1).scrape_product("iphone-15", Some("EBAY"), false).await?;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].platform, "eBay AU");
    assert!(reports[0].is_success());
    assert_eq!(env.renderer.calls(), vec![EBAY_A.to_string()]);

    match env.coordinator(1).scrape_product("iphone-15", Some("shopee"), false).await {
        Err(AppError::NotFound { resource }) => assert!(resource.contains("shopee")),
        other => panic!("expected not found, got {:?}", other.map(|r| r.len())),
    }
    Ok(())
}

#[tokio::test]
async fn test_scrape_product_dry_run_fetches_nothing() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let lazada = env.platform("Lazada", "MYR").await?;
    env.platform("eBay AU", "AUD").await?;
    let iphone = env.product("iPhone 15").await?;
    env.store.set_target_url(&iphone.id, &lazada.id, LAZADA_A).await?;

    let reports = env.coordinator(1).scrape_product(&iphone.id, None, true).await?;

    assert_eq!(reports.len(), 2);
    let by_name = |name: &str| reports.iter().find(|r| r.platform == name).cloned();
    assert_eq!(by_name("Lazada").map(|r| r.status), Some(PlatformStatus::WouldScrape));
    assert!(matches!(
        by_name("eBay AU").map(|r| r.status),
        Some(PlatformStatus::Skipped(_))
    ));
    assert!(env.renderer.calls().is_empty());
    assert_eq!(env.store.observation_count(&iphone.id).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_scrape_product_reports_failures() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let lazada = env.platform("Lazada", "MYR").await?;
    let iphone = env.product("iPhone 15").await?;
    env.store.set_target_url(&iphone.id, &lazada.id, LAZADA_A).await?;
    env.renderer.serve(LAZADA_A, empty_page());

    let reports = env.coordinator(1).scrape_product("iphone-15", None, false).await?;

    assert_eq!(reports[0].status, PlatformStatus::Scraped(ScrapeOutcome::NoData));
    assert_eq!(reports[0].to_string(), "Lazada: failed, no price data found");
    Ok(())
}
