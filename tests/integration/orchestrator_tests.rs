// Orchestrator behaviour end to end: strategy resolution, retry with backoff,
// validation and the single observation row written on success.

use std::time::Duration;

use price_compare::models::NewPlatform;
use price_compare::orchestrator::ScrapeOutcome;
use price_compare::utils::ScrapeError;
use rust_decimal::Decimal;
use std::str::FromStr;

use super::*;

const LAZADA_URL: &str = "https://www.lazada.com.my/products/sony-wh-1000xm5-i1234.html";
const EBAY_URL: &str = "https://www.ebay.com.au/itm/1234567890";

#[tokio::test]
async fn test_always_empty_page_exhausts_attempts() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let platform = env.platform("Lazada", "MYR").await?;
    let product = env.product("Sony WH-1000XM5").await?;
    env.renderer.serve(LAZADA_URL, empty_page());

    let outcome = env.orchestrator.scrape_one(&product, &platform, LAZADA_URL).await?;

    assert_eq!(outcome, ScrapeOutcome::NoData);
    assert_eq!(env.renderer.calls_to(LAZADA_URL), 3);
    assert_eq!(env.clock.sleeps(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
    assert_eq!(env.store.observation_count(&product.id).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_success_on_second_attempt_writes_one_row() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let platform = env.platform("Lazada", "MYR").await?;
    let product = env.product("Sony WH-1000XM5").await?;
    env.renderer
        .script(LAZADA_URL, vec![Ok(empty_page()), Ok(lazada_page("RM1,299.00"))]);

    let outcome = env.orchestrator.scrape_one(&product, &platform, LAZADA_URL).await?;

    let observation = outcome.observation().expect("second attempt succeeds");
    assert_eq!(observation.price, Decimal::from_str("1299.00")?);
    assert_eq!(observation.currency, "MYR");
    assert_eq!(observation.source_url, LAZADA_URL);
    assert_eq!(observation.seller_name.as_deref(), Some("Official Store"));
    assert_eq!(env.renderer.calls_to(LAZADA_URL), 2);
    assert_eq!(env.clock.sleeps(), vec![Duration::from_secs(1)]);
    assert_eq!(env.store.observation_count(&product.id).await?, 1);

    let latest = env.store.latest_prices(&product.id).await?;
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].observation.id, observation.id);
    assert_eq!(latest[0].observation.captured_at, observation.captured_at);
    Ok(())
}

#[tokio::test]
async fn test_invalid_price_is_retried_then_reported() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let platform = env.platform("Lazada", "MYR").await?;
    let product = env.product("Free Sample").await?;
    env.renderer.serve(LAZADA_URL, lazada_page("RM0.00"));

    let outcome = env.orchestrator.scrape_one(&product, &platform, LAZADA_URL).await?;

    match outcome {
        ScrapeOutcome::InvalidData(reason) => assert!(reason.contains("price"), "{}", reason),
        other => panic!("expected invalid data, got {:?}", other),
    }
    assert_eq!(env.renderer.calls_to(LAZADA_URL), 3);
    assert_eq!(env.store.observation_count(&product.id).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_transport_failure_is_retried_like_no_data() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let platform = env.platform("eBay AU", "AUD").await?;
    let product = env.product("Kindle Paperwhite").await?;
    env.renderer.script(
        EBAY_URL,
        vec![
            Err(ScrapeError::Transport("net::ERR_CONNECTION_RESET".to_string())),
            Err(ScrapeError::Transport("net::ERR_CONNECTION_RESET".to_string())),
            Ok(ebay_page("239.00", "AUD")),
        ],
    );

    let outcome = env.orchestrator.scrape_one(&product, &platform, EBAY_URL).await?;

    let observation = outcome.observation().expect("third attempt succeeds");
    assert_eq!(observation.currency, "AUD");
    assert_eq!(observation.seller_name.as_deref(), Some("eBay Seller"));
    assert_eq!(env.clock.sleeps(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
    Ok(())
}

#[tokio::test]
async fn test_persistent_transport_failure() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let platform = env.platform("eBay AU", "AUD").await?;
    let product = env.product("Kindle Paperwhite").await?;

    // Nothing scripted: every render fails
    let outcome = env.orchestrator.scrape_one(&product, &platform, EBAY_URL).await?;

    assert!(matches!(outcome, ScrapeOutcome::TransportFailure(_)), "{:?}", outcome);
    assert_eq!(env.renderer.calls_to(EBAY_URL), 3);
    Ok(())
}

#[tokio::test]
async fn test_preconditions_fail_before_any_fetch() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let product = env.product("Sony WH-1000XM5").await?;
    let active = env.platform("Lazada", "MYR").await?;
    let inactive = env
        .store
        .create_platform(NewPlatform {
            name: "AliExpress".to_string(),
            base_url: None,
            currency: Some("USD".to_string()),
            is_active: Some(false),
            scraping_delay: Some(0),
        })
        .await?;

    let outcome = env
        .orchestrator
        .scrape_one(&product, &inactive, "https://www.aliexpress.com/item/1.html")
        .await?;
    assert!(matches!(outcome, ScrapeOutcome::InvalidData(_)));

    for bad_url in ["/products/relative.html", "not a url", "ftp://lazada.com.my/x"] {
        let outcome = env.orchestrator.scrape_one(&product, &active, bad_url).await?;
        assert!(matches!(outcome, ScrapeOutcome::InvalidData(_)), "{}", bad_url);
    }

    assert!(env.renderer.calls().is_empty());
    assert!(env.clock.sleeps().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_platform_without_strategy() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let platform = env.platform("Shopee", "MYR").await?;
    let product = env.product("Sony WH-1000XM5").await?;

    let outcome = env
        .orchestrator
        .scrape_one(&product, &platform, "https://shopee.com.my/product/1/2")
        .await?;

    assert_eq!(outcome, ScrapeOutcome::TransportFailure("no strategy".to_string()));
    assert!(env.renderer.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_single_attempt_has_no_backoff() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let platform = env.platform("Lazada", "MYR").await?;
    let product = env.product("Sony WH-1000XM5").await?;
    env.renderer.serve(LAZADA_URL, empty_page());

    let outcome = env
        .orchestrator
        .scrape_one_with_attempts(&product, &platform, LAZADA_URL, 1)
        .await?;

    assert_eq!(outcome, ScrapeOutcome::NoData);
    assert_eq!(env.renderer.calls_to(LAZADA_URL), 1);
    assert!(env.clock.sleeps().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_hanging_render_is_cut_off_by_attempt_deadline() -> anyhow::Result<()> {
    let env = TestEnv::with_config(ScraperConfig {
        attempt_timeout: 1,
        ..test_scraper_config()
    })
    .await?;
    let platform = env.platform("Lazada", "MYR").await?;
    let product = env.product("Sony WH-1000XM5").await?;
    env.renderer.hang(LAZADA_URL);

    // Only timers from here on, so the paused clock can jump to each deadline
    tokio::time::pause();
    let outcome = env.orchestrator.scrape_one(&product, &platform, LAZADA_URL).await?;
    tokio::time::resume();

    assert_eq!(outcome, ScrapeOutcome::TransportFailure("timed out after 1s".to_string()));
    assert_eq!(env.renderer.calls_to(LAZADA_URL), 3);
    assert_eq!(env.clock.sleeps(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
    assert_eq!(env.store.observation_count(&product.id).await?, 0);
    Ok(())
}
