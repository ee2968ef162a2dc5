//! Engine configuration
//!
//! Every tunable is read once from the environment at construction time and
//! carried on an [`EngineConfig`] value. Missing or unparseable variables
//! fall back to the documented defaults so a bare environment always yields
//! a usable configuration.

use std::time::Duration;
use tracing::warn;

/// Default city-discovery concurrency (`CITY_CONCURRENCY`).
pub const DEFAULT_CITY_CONCURRENCY: usize = 2;

/// Default detail-extraction concurrency (`DETAIL_CONCURRENCY`).
pub const DEFAULT_DETAIL_CONCURRENCY: usize = 4;

/// Default page pool capacity (`POOL_MAX_PAGES`).
pub const DEFAULT_POOL_MAX_PAGES: usize = 6;

/// Minimum population for a bucketized candidate to be kept.
pub const DEFAULT_MIN_POPULATION: u64 = 5_000;

/// Configuration for a single engine instance.
///
/// Durations are stored as [`Duration`] regardless of the millisecond
/// granularity of the corresponding environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Concurrent tier-A zone scrapes (`CITY_CONCURRENCY`).
    pub city_concurrency: usize,
    /// Concurrent tier-B page-bound detail extractions (`DETAIL_CONCURRENCY`).
    pub detail_concurrency: usize,
    /// Page pool capacity (`POOL_MAX_PAGES`).
    pub pool_max_pages: usize,

    /// Navigation timeout for tier-A search pages (`SEARCH_NAV_TIMEOUT_MS`).
    pub search_nav_timeout: Duration,
    /// Navigation timeout for tier-B detail pages (`DETAIL_NAV_TIMEOUT_MS`).
    pub detail_nav_timeout: Duration,

    /// Browser session TTL before rotation (`BROWSER_SESSION_MAX_MS`).
    pub session_max_age: Duration,
    /// How long rotation waits for in-flight pages to drain
    /// (`BROWSER_SESSION_DRAIN_TIMEOUT_MS`).
    pub session_drain_timeout: Duration,
    /// Retries against a fresh session on session-class errors
    /// (`BROWSER_SESSION_RETRY_LIMIT`).
    pub session_retry_limit: u32,

    /// Age after which an unfinished detail task stops counting toward the
    /// scheduling budget (`TASK_STUCK_TIMEOUT_MS`).
    pub task_stuck_timeout: Duration,

    /// Zones generated per batch (`ZONE_BATCH_SIZE`).
    pub zone_batch_size: usize,
    /// Hard cap on zones per run (`MAX_TOTAL_ZONES`).
    pub max_total_zones: usize,

    /// Wall-clock limit for a run (`JOB_TIMEOUT_MS`).
    pub job_timeout: Duration,
    /// No record-count change for this long means stuck
    /// (`STUCK_RECORDS_TIMEOUT_MS`).
    pub stuck_records_timeout: Duration,
    /// No percentage change for this long means stuck
    /// (`STUCK_PERCENTAGE_TIMEOUT_MS`).
    pub stuck_percentage_timeout: Duration,
    /// Grace period before teardown after a stuck signal
    /// (`STUCK_JOB_GRACE_PERIOD_MS`).
    pub stuck_grace_period: Duration,

    /// Retries for retryable scrape-API errors (`SCRAPE_API_MAX_RETRIES`).
    pub scrape_api_max_retries: u32,
    /// Concurrent outbound scrape-API calls (`SCRAPE_API_CONCURRENCY`).
    pub scrape_api_concurrency: usize,

    /// TTL for dedup-store entries, in days (`REDIS_URL_TTL_DAYS`).
    pub dedup_ttl_days: u64,

    /// Block images, fonts and media on pooled pages
    /// (`BLOCK_HEAVY_RESOURCES`).
    pub block_heavy_resources: bool,
    /// Additionally block stylesheets (`BLOCK_STYLESHEETS`).
    pub block_stylesheets: bool,

    /// Minimum population for bucketized candidates (`MIN_POPULATION`).
    pub min_population: u64,

    /// Run the browser headless (`HEADLESS`).
    pub headless: bool,

    /// Scrape-API endpoint for the no-page detail path (`SCRAPE_API_URL`).
    pub scrape_api_url: String,
    /// Content-API endpoint used by email extraction (`CONTENT_API_URL`).
    pub content_api_url: String,
    /// Geocoding endpoint for bounds resolution (`GEOCODE_URL`).
    pub geocode_url: String,
    /// Redis connection string for the dedup store (`REDIS_URL`).
    pub redis_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            city_concurrency: DEFAULT_CITY_CONCURRENCY,
            detail_concurrency: DEFAULT_DETAIL_CONCURRENCY,
            pool_max_pages: DEFAULT_POOL_MAX_PAGES,
            search_nav_timeout: Duration::from_millis(45_000),
            detail_nav_timeout: Duration::from_millis(25_000),
            session_max_age: Duration::from_millis(60_000),
            session_drain_timeout: Duration::from_millis(3_000),
            session_retry_limit: 1,
            task_stuck_timeout: Duration::from_millis(180_000),
            zone_batch_size: 50,
            max_total_zones: 2_500,
            job_timeout: Duration::from_millis(5_400_000),
            stuck_records_timeout: Duration::from_millis(600_000),
            stuck_percentage_timeout: Duration::from_millis(300_000),
            stuck_grace_period: Duration::from_millis(30_000),
            scrape_api_max_retries: 2,
            scrape_api_concurrency: 3,
            dedup_ttl_days: 365,
            block_heavy_resources: true,
            block_stylesheets: false,
            min_population: DEFAULT_MIN_POPULATION,
            headless: true,
            scrape_api_url: "http://127.0.0.1:8900/v1/scrape".to_string(),
            content_api_url: "http://127.0.0.1:8900/v1/content".to_string(),
            geocode_url: "https://nominatim.openstreetmap.org/search".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

impl EngineConfig {
    /// Build a configuration from the process environment.
    ///
    /// Unset variables use defaults. Unparseable values log a warning and
    /// fall back rather than failing the run.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            city_concurrency: env_parse("CITY_CONCURRENCY", defaults.city_concurrency),
            detail_concurrency: env_parse("DETAIL_CONCURRENCY", defaults.detail_concurrency),
            pool_max_pages: env_parse("POOL_MAX_PAGES", defaults.pool_max_pages),
            search_nav_timeout: env_millis("SEARCH_NAV_TIMEOUT_MS", defaults.search_nav_timeout),
            detail_nav_timeout: env_millis("DETAIL_NAV_TIMEOUT_MS", defaults.detail_nav_timeout),
            session_max_age: env_millis("BROWSER_SESSION_MAX_MS", defaults.session_max_age),
            session_drain_timeout: env_millis(
                "BROWSER_SESSION_DRAIN_TIMEOUT_MS",
                defaults.session_drain_timeout,
            ),
            session_retry_limit: env_parse(
                "BROWSER_SESSION_RETRY_LIMIT",
                defaults.session_retry_limit,
            ),
            task_stuck_timeout: env_millis("TASK_STUCK_TIMEOUT_MS", defaults.task_stuck_timeout),
            zone_batch_size: env_parse("ZONE_BATCH_SIZE", defaults.zone_batch_size).max(1),
            max_total_zones: env_parse("MAX_TOTAL_ZONES", defaults.max_total_zones).max(1),
            job_timeout: env_millis("JOB_TIMEOUT_MS", defaults.job_timeout),
            stuck_records_timeout: env_millis(
                "STUCK_RECORDS_TIMEOUT_MS",
                defaults.stuck_records_timeout,
            ),
            stuck_percentage_timeout: env_millis(
                "STUCK_PERCENTAGE_TIMEOUT_MS",
                defaults.stuck_percentage_timeout,
            ),
            stuck_grace_period: env_millis(
                "STUCK_JOB_GRACE_PERIOD_MS",
                defaults.stuck_grace_period,
            ),
            scrape_api_max_retries: env_parse(
                "SCRAPE_API_MAX_RETRIES",
                defaults.scrape_api_max_retries,
            ),
            scrape_api_concurrency: env_parse(
                "SCRAPE_API_CONCURRENCY",
                defaults.scrape_api_concurrency,
            )
            .max(1),
            dedup_ttl_days: env_parse("REDIS_URL_TTL_DAYS", defaults.dedup_ttl_days).max(1),
            block_heavy_resources: env_parse("BLOCK_HEAVY_RESOURCES", defaults.block_heavy_resources),
            block_stylesheets: env_parse("BLOCK_STYLESHEETS", defaults.block_stylesheets),
            min_population: env_parse("MIN_POPULATION", defaults.min_population),
            headless: env_parse("HEADLESS", defaults.headless),
            scrape_api_url: env_string("SCRAPE_API_URL", defaults.scrape_api_url),
            content_api_url: env_string("CONTENT_API_URL", defaults.content_api_url),
            geocode_url: env_string("GEOCODE_URL", defaults.geocode_url),
            redis_url: env_string("REDIS_URL", defaults.redis_url),
        }
    }

    /// Dedup-store TTL as a [`Duration`].
    #[must_use]
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_days * 24 * 60 * 60)
    }
}

fn env_string(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparseable {name}={raw:?}, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_millis(name: &str, default: Duration) -> Duration {
    Duration::from_millis(env_parse(name, default.as_millis() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.city_concurrency, 2);
        assert_eq!(config.search_nav_timeout, Duration::from_millis(45_000));
        assert_eq!(config.job_timeout, Duration::from_millis(5_400_000));
        assert_eq!(config.dedup_ttl_days, 365);
        assert!(config.block_heavy_resources);
    }

    #[test]
    fn dedup_ttl_converts_days() {
        let config = EngineConfig {
            dedup_ttl_days: 2,
            ..EngineConfig::default()
        };
        assert_eq!(config.dedup_ttl(), Duration::from_secs(2 * 86_400));
    }
}
