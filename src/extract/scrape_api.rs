//! REST clients for the no-page extraction path.
//!
//! The detail-scrape API renders a detail URL server-side and returns the
//! text of the requested elements. The content API fetches a business
//! website for email extraction. Both share one HTTP client and a
//! concurrency limiter that is independent of the browser-page limiter.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

use crate::browser::ENGINE_USER_AGENT;
use crate::config::EngineConfig;
use crate::limiter::TaskLimiter;

use super::selectors;

/// Cap on fetched website bodies during email extraction.
const MAX_SITE_BODY_BYTES: usize = 512 * 1024;

/// Element texts returned by the detail-scrape API, keyed by the names in
/// [`selectors::detail_elements`].
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DetailPayload {
    #[serde(default)]
    pub elements: HashMap<String, Option<String>>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl DetailPayload {
    /// Trimmed, non-empty text of one element.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<String> {
        self.elements
            .get(name)
            .and_then(|value| value.as_deref())
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    }
}

/// Client for the external scrape and content APIs.
pub struct ScrapeApiClient {
    http: reqwest::Client,
    scrape_endpoint: String,
    content_endpoint: String,
    limiter: TaskLimiter,
    max_retries: u32,
}

impl ScrapeApiClient {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(ENGINE_USER_AGENT)
            .build()
            .context("building scrape API client")?;
        Ok(Self {
            http,
            scrape_endpoint: config.scrape_api_url.clone(),
            content_endpoint: config.content_api_url.clone(),
            limiter: TaskLimiter::new(config.scrape_api_concurrency),
            max_retries: config.scrape_api_max_retries,
        })
    }

    /// Fetch the element texts of a detail page, retrying retryable
    /// failures with exponential backoff (2s, 4s, 8s).
    pub async fn fetch_detail(&self, url: &str) -> Result<DetailPayload> {
        let mut attempt = 0;
        loop {
            let result = self.limiter.run(self.fetch_detail_once(url)).await;
            match result {
                Ok(payload) => return Ok(payload),
                Err(error) if attempt < self.max_retries && is_retryable_upstream(&error) => {
                    let delay = Duration::from_secs(2u64 << attempt);
                    attempt += 1;
                    warn!(
                        "scrape API retry {attempt}/{} in {delay:?}: {error:#}",
                        self.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn fetch_detail_once(&self, url: &str) -> Result<DetailPayload> {
        let response = self
            .http
            .post(&self.scrape_endpoint)
            .json(&serde_json::json!({
                "url": url,
                "elements": selectors::detail_elements(),
            }))
            .send()
            .await
            .context("scrape API request")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("scrape API returned http {}", status.as_u16()));
        }
        response.json().await.context("scrape API payload")
    }

    /// Fetch a website body for email extraction, truncated to a sane size.
    pub async fn fetch_site_text(&self, url: &str) -> Result<String> {
        let body = self
            .limiter
            .run(async {
                let response = self
                    .http
                    .get(&self.content_endpoint)
                    .query(&[("url", url)])
                    .send()
                    .await
                    .context("content API request")?;
                let status = response.status();
                if !status.is_success() {
                    return Err(anyhow!("content API returned http {}", status.as_u16()));
                }
                response.text().await.context("content API body")
            })
            .await?;

        let mut body = body;
        if body.len() > MAX_SITE_BODY_BYTES {
            body.truncate(MAX_SITE_BODY_BYTES);
        }
        Ok(body)
    }
}

/// Whether an upstream failure is worth retrying.
///
/// Timeouts, transient 5xx and aborted transfers are; other 4xx (except
/// 408) and parse failures are not.
#[must_use]
pub fn is_retryable_upstream(error: &anyhow::Error) -> bool {
    let text = format!("{error:#}").to_lowercase();
    if text.contains("http 408") {
        return true;
    }
    if let Some(rest) = text.split("http ").nth(1)
        && let Some(code) = rest.get(..3)
        && let Ok(code) = code.parse::<u16>()
    {
        return (500..600).contains(&code);
    }
    text.contains("timeout")
        || text.contains("timed out")
        || text.contains("err_aborted")
        || text.contains("connection reset")
        || text.contains("connection refused")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(server: &mockito::Server) -> EngineConfig {
        EngineConfig {
            scrape_api_url: format!("{}/v1/scrape", server.url()),
            content_api_url: format!("{}/v1/content", server.url()),
            scrape_api_max_retries: 2,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn classifies_retryable_errors() {
        assert!(is_retryable_upstream(&anyhow!("scrape API returned http 503")));
        assert!(is_retryable_upstream(&anyhow!("scrape API returned http 408")));
        assert!(is_retryable_upstream(&anyhow!("request timed out")));
        assert!(is_retryable_upstream(&anyhow!("net::ERR_ABORTED")));
        assert!(!is_retryable_upstream(&anyhow!("scrape API returned http 404")));
        assert!(!is_retryable_upstream(&anyhow!("missing name element")));
    }

    #[tokio::test]
    async fn parses_detail_payload() {
        let mut server = mockito::Server::new_async().await;
        let body = r#"{"elements":{"name":"Acme Dental","phone":"(559) 555-0101","rating":"4.6"},"latitude":36.75,"longitude":-119.77}"#;
        let mock = server
            .mock("POST", "/v1/scrape")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;

        let client = ScrapeApiClient::new(&config_for(&server)).expect("client");
        let payload = client
            .fetch_detail("https://maps.example.com/maps/place/acme")
            .await
            .expect("payload");

        assert_eq!(payload.text("name").as_deref(), Some("Acme Dental"));
        assert_eq!(payload.latitude, Some(36.75));
        assert_eq!(payload.text("website"), None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn retries_transient_5xx_up_to_limit() {
        let mut server = mockito::Server::new_async().await;
        // Initial attempt plus one retry.
        let mock = server
            .mock("POST", "/v1/scrape")
            .with_status(502)
            .expect(2)
            .create_async()
            .await;

        let mut config = config_for(&server);
        config.scrape_api_max_retries = 1;
        let client = ScrapeApiClient::new(&config).expect("client");
        let started = std::time::Instant::now();
        let error = client
            .fetch_detail("https://x.example/1")
            .await
            .expect_err("still failing");
        assert!(format!("{error}").contains("502"));
        // One backoff step of 2s happened between the attempts.
        assert!(started.elapsed() >= Duration::from_secs(2));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn does_not_retry_4xx() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/scrape")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let client = ScrapeApiClient::new(&config_for(&server)).expect("client");
        let error = client
            .fetch_detail("https://x.example/1")
            .await
            .expect_err("should fail");
        assert!(format!("{error}").contains("404"));
        mock.assert_async().await;
    }
}
