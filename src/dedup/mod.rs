//! Per-user URL deduplication.
//!
//! Detail URLs are normalized down to their stable place identifier before
//! they touch the store, so cosmetic query differences collapse to one set
//! member. The store itself is a collaborator; when it errors, checks
//! degrade to "unseen" and marks are swallowed so extraction never blocks
//! on it.

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

pub mod redis_store;

pub use redis_store::RedisDedupStore;

/// Place identifier inside the compound `data` parameter.
static PLACE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"1s([^!]+)!").unwrap_or_else(|e| panic!("place id regex: {e}")));

/// Normalize a detail URL for dedup purposes.
///
/// When the compound `data` parameter carries a place identifier
/// (`1s<ID>!`), the URL reduces to `origin + path + "?data=!4m7!3m6!1s<ID>"`.
/// Otherwise only the `data` parameter is preserved. The parameter is
/// accepted both as a query pair and as a trailing `data=` path segment.
/// Unparseable input is returned trimmed. Idempotent.
#[must_use]
pub fn normalize_detail_url(raw: &str) -> String {
    let Ok(parsed) = Url::parse(raw.trim()) else {
        return raw.trim().to_string();
    };

    let origin = parsed.origin().ascii_serialization();

    let query_data = parsed
        .query_pairs()
        .find(|(key, _)| key == "data")
        .map(|(_, value)| value.into_owned());

    let (path, data) = match query_data {
        Some(data) => (parsed.path().to_string(), Some(data)),
        None => {
            let mut segments: Vec<&str> = parsed
                .path_segments()
                .map(|segments| segments.collect())
                .unwrap_or_default();
            let mut data = None;
            if let Some(last) = segments.last()
                && let Some(rest) = last.strip_prefix("data=")
            {
                data = Some(rest.to_string());
                segments.pop();
            }
            (format!("/{}", segments.join("/")), data)
        }
    };

    if let Some(data) = &data
        && let Some(captures) = PLACE_ID_RE.captures(data)
        && let Some(id) = captures.get(1)
    {
        return format!("{origin}{path}?data=!4m7!3m6!1s{}", id.as_str());
    }

    match data {
        Some(data) => format!("{origin}{path}?data={data}"),
        None => format!("{origin}{path}"),
    }
}

/// Durable per-user set of normalized URLs with a TTL.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// `true` per URL already present for the user.
    async fn batch_check(&self, user_id: &str, urls: &[String]) -> anyhow::Result<Vec<bool>>;

    /// Idempotent add with TTL refresh.
    async fn mark(&self, user_id: &str, url: &str) -> anyhow::Result<()>;

    /// Pipelined add of several URLs.
    async fn batch_mark(&self, user_id: &str, urls: &[String]) -> anyhow::Result<()>;
}

/// Normalizing, degrade-open front over a [`DedupStore`].
#[derive(Clone)]
pub struct UrlDeduper {
    store: Arc<dyn DedupStore>,
}

impl UrlDeduper {
    #[must_use]
    pub fn new(store: Arc<dyn DedupStore>) -> Self {
        Self { store }
    }

    /// Check which URLs the user has already seen. On store failure every
    /// URL reports unseen so listing proceeds unfiltered.
    pub async fn batch_check(&self, user_id: &str, urls: &[String]) -> Vec<bool> {
        let normalized: Vec<String> = urls.iter().map(|u| normalize_detail_url(u)).collect();
        match self.store.batch_check(user_id, &normalized).await {
            Ok(seen) if seen.len() == urls.len() => seen,
            Ok(seen) => {
                warn!(
                    "dedup store returned {} flags for {} urls, treating all as unseen",
                    seen.len(),
                    urls.len()
                );
                vec![false; urls.len()]
            }
            Err(error) => {
                warn!("dedup check unavailable, proceeding unfiltered: {error:#}");
                vec![false; urls.len()]
            }
        }
    }

    /// Best-effort mark after a successful extraction.
    pub async fn mark(&self, user_id: &str, url: &str) {
        let normalized = normalize_detail_url(url);
        if let Err(error) = self.store.mark(user_id, &normalized).await {
            debug!("dedup mark failed for {normalized}: {error:#}");
        }
    }
}

/// In-memory store for tests and the demo binary.
#[derive(Debug, Default)]
pub struct MemoryDedupStore {
    sets: DashMap<String, HashSet<String>>,
}

impl MemoryDedupStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn count_for(&self, user_id: &str) -> usize {
        self.sets.get(user_id).map_or(0, |set| set.len())
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn batch_check(&self, user_id: &str, urls: &[String]) -> anyhow::Result<Vec<bool>> {
        let seen = self.sets.get(user_id);
        Ok(urls
            .iter()
            .map(|url| seen.as_ref().is_some_and(|set| set.contains(url)))
            .collect())
    }

    async fn mark(&self, user_id: &str, url: &str) -> anyhow::Result<()> {
        self.sets
            .entry(user_id.to_string())
            .or_default()
            .insert(url.to_string());
        Ok(())
    }

    async fn batch_mark(&self, user_id: &str, urls: &[String]) -> anyhow::Result<()> {
        let mut set = self.sets.entry(user_id.to_string()).or_default();
        for url in urls {
            set.insert(url.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLACE_URL: &str = "https://maps.example.com/maps/place/Acme+Dental/@36.7,-119.8,17z/data=!3m1!4b1!4m6!3m5!1s0x809e75b5:0xdeadbeef!8m2!3d36.7?hl=en&entry=ttu";

    #[test]
    fn reduces_to_place_id() {
        assert_eq!(
            normalize_detail_url(PLACE_URL),
            "https://maps.example.com/maps/place/Acme+Dental/@36.7,-119.8,17z?data=!4m7!3m6!1s0x809e75b5:0xdeadbeef"
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_detail_url(PLACE_URL);
        assert_eq!(normalize_detail_url(&once), once);

        let plain = normalize_detail_url("https://maps.example.com/maps/place/Foo?hl=en");
        assert_eq!(normalize_detail_url(&plain), plain);
    }

    #[test]
    fn same_place_id_normalizes_equal() {
        let a = "https://maps.example.com/maps/place/A?data=!4m6!3m5!1sABC:123!8m2&hl=en";
        let b = "https://maps.example.com/maps/place/A?data=!1m2!1sABC:123!9m1&entry=x";
        assert_eq!(normalize_detail_url(a), normalize_detail_url(b));
    }

    #[test]
    fn drops_non_data_query() {
        let normalized = normalize_detail_url("https://maps.example.com/maps/place/Foo?hl=en&x=1");
        assert_eq!(normalized, "https://maps.example.com/maps/place/Foo");
    }

    #[test]
    fn unparseable_input_passes_through() {
        assert_eq!(normalize_detail_url("  not a url  "), "not a url");
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let deduper = UrlDeduper::new(Arc::new(MemoryDedupStore::new()));
        let url = PLACE_URL.to_string();

        assert_eq!(deduper.batch_check("u1", &[url.clone()]).await, vec![false]);
        deduper.mark("u1", &url).await;
        assert_eq!(deduper.batch_check("u1", &[url.clone()]).await, vec![true]);
        // Other users are unaffected.
        assert_eq!(deduper.batch_check("u2", &[url]).await, vec![false]);
    }

    #[tokio::test]
    async fn mark_is_idempotent() {
        let store = Arc::new(MemoryDedupStore::new());
        let deduper = UrlDeduper::new(store.clone());
        deduper.mark("u1", PLACE_URL).await;
        deduper.mark("u1", PLACE_URL).await;
        assert_eq!(store.count_for("u1"), 1);
    }

    #[tokio::test]
    async fn check_degrades_open_on_store_error() {
        struct FailingStore;

        #[async_trait]
        impl DedupStore for FailingStore {
            async fn batch_check(&self, _: &str, _: &[String]) -> anyhow::Result<Vec<bool>> {
                anyhow::bail!("store offline")
            }
            async fn mark(&self, _: &str, _: &str) -> anyhow::Result<()> {
                anyhow::bail!("store offline")
            }
            async fn batch_mark(&self, _: &str, _: &[String]) -> anyhow::Result<()> {
                anyhow::bail!("store offline")
            }
        }

        let deduper = UrlDeduper::new(Arc::new(FailingStore));
        let urls = vec![
            "https://a.example/1".to_string(),
            "https://a.example/2".to_string(),
        ];
        assert_eq!(deduper.batch_check("u1", &urls).await, vec![false, false]);
        // Swallowed, not fatal.
        deduper.mark("u1", &urls[0]).await;
    }
}
