//! Demo runner: one extraction job from the command line.
//!
//! Usage: `leadharvest <keyword> <country> [state] [city] [max_records]`
//!
//! Wires the production collaborators (browser session, scrape API, Redis
//! dedup when `REDIS_URL` is reachable) and prints the collected records as
//! JSON. The job queue normally sits where this binary's argument parsing
//! is.

use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use leadharvest::browser::{SessionConfig, SessionManager};
use leadharvest::config::EngineConfig;
use leadharvest::dedup::{DedupStore, MemoryDedupStore, RedisDedupStore};
use leadharvest::extract::{BrowserListingSource, MapsDetailExtractor, ScrapeApiClient};
use leadharvest::geo::{HttpBoundsResolver, StaticPopulationIndex, StaticRegionIndex};
use leadharvest::job::NullJobHandle;
use leadharvest::records::JobParams;
use leadharvest::scheduler::{Collaborators, Engine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let keyword = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: leadharvest <keyword> <country> [state] [city] [max_records]"))?;
    let country_code = args.next().unwrap_or_else(|| "US".to_string());
    let state_code = args.next().filter(|s| !s.is_empty());
    let city = args.next().filter(|s| !s.is_empty());
    let max_records = args.next().and_then(|raw| raw.parse().ok());

    let config = EngineConfig::from_env();

    let session = SessionManager::launch(SessionConfig::from_engine(&config)).await?;
    let api = Arc::new(ScrapeApiClient::new(&config)?);

    let dedup: Arc<dyn DedupStore> =
        match RedisDedupStore::connect(&config.redis_url, config.dedup_ttl()).await {
            Ok(store) => Arc::new(store),
            Err(error) => {
                warn!("redis unavailable, using in-memory dedup: {error:#}");
                Arc::new(MemoryDedupStore::new())
            }
        };

    let regions = match std::env::var("REGION_DATA_PATH") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)?;
            Arc::new(StaticRegionIndex::from_json_str(&raw)?)
        }
        Err(_) => Arc::new(StaticRegionIndex::new()),
    };

    let engine = Engine::new(
        config.clone(),
        Collaborators {
            job: Arc::new(NullJobHandle),
            dedup,
            regions,
            populations: Arc::new(StaticPopulationIndex::new()),
            bounds: Arc::new(HttpBoundsResolver::new(config.geocode_url.clone())?),
            listings: Arc::new(BrowserListingSource::new(
                session.clone(),
                config.search_nav_timeout,
            )),
            details: Arc::new(MapsDetailExtractor::new(
                api,
                Some(session.clone()),
                config.detail_nav_timeout,
            )),
            session: Some(session),
        },
    );

    let params = JobParams {
        keyword,
        country_code,
        state_code,
        city,
        max_records,
        rating_filter: None,
        review_filter: None,
        review_time_range: None,
        is_extract_email: std::env::var("EXTRACT_EMAIL").is_ok(),
        is_validate: false,
        extract_negative_reviews: false,
        avoid_duplicate: false,
        only_without_website: false,
        user_id: std::env::var("USER_ID").ok(),
    };

    let records = engine.run(params).await?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}
