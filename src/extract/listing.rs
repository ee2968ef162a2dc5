//! Tier-A listing discovery on a search page.
//!
//! Navigates a zone's search URL, scrolls the lazy result panel until enough
//! cards are loaded, and parses the cards into [`ListingCard`]s. Rating and
//! review counts come out of aria labels; the parse regexes live here so
//! they are testable without a browser.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::Page;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::browser::SessionManager;
use crate::geo::zones::Zone;
#[cfg(test)]
use crate::geo::zones::ZoneKind;
use crate::records::{ListingCard, NumericFilter};
use crate::scheduler::stop::StopFlag;

use super::selectors;

static RATING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+\.?\d*) stars?").unwrap_or_else(|e| panic!("rating regex: {e}")));

static REVIEWS_ARIA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,3}(?:,\d{3})*|\d+) Reviews?")
        .unwrap_or_else(|e| panic!("reviews regex: {e}"))
});

static REVIEWS_PAREN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([\d,]+)\)").unwrap_or_else(|e| panic!("paren regex: {e}")));

/// Search URL plus the location attribution for records found through it.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub keyword: String,
    pub url: String,
    pub location_label: String,
}

/// Build the search query for a zone.
///
/// Coordinate zones anchor the query at their grid point; name zones spell
/// the location out in the query text.
#[must_use]
pub fn build_search_query(keyword: &str, country_code: &str, zone: &Zone) -> SearchQuery {
    let mut location_parts = Vec::new();
    if let Some(city) = &zone.city_name {
        location_parts.push(city.clone());
    }
    if let Some(state) = &zone.state_code {
        location_parts.push(state.clone());
    } else if let Some(state_name) = &zone.state_name {
        location_parts.push(state_name.clone());
    }
    location_parts.push(country_code.to_string());
    let location_label = location_parts.join(", ");

    let encoded_keyword = urlencoding::encode(keyword);
    let url = match &zone.coords {
        Some(coords) => format!(
            "{}/{}/@{},{},14z?hl=en",
            selectors::SEARCH_BASE_URL,
            encoded_keyword,
            coords.lat,
            coords.lng
        ),
        None => format!(
            "{}/{}+in+{}?hl=en",
            selectors::SEARCH_BASE_URL,
            encoded_keyword,
            urlencoding::encode(&location_label)
        ),
    };

    SearchQuery {
        keyword: keyword.to_string(),
        url,
        location_label,
    }
}

/// Parse a star rating out of an aria label.
#[must_use]
pub fn parse_rating(label: &str) -> Option<f64> {
    RATING_RE
        .captures(label)
        .and_then(|captures| captures.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Parse a review count, preferring the aria label, falling back to the
/// sibling `(1,234)` text. Returns the numeric count and the raw string.
#[must_use]
pub fn parse_review_count(
    aria: Option<&str>,
    sibling: Option<&str>,
) -> (Option<u32>, Option<String>) {
    if let Some(aria) = aria
        && let Some(captures) = REVIEWS_ARIA_RE.captures(aria)
        && let Some(m) = captures.get(1)
    {
        let raw = m.as_str().to_string();
        return (raw.replace(',', "").parse().ok(), Some(raw));
    }
    if let Some(sibling) = sibling
        && let Some(captures) = REVIEWS_PAREN_RE.captures(sibling)
        && let Some(m) = captures.get(1)
    {
        let raw = m.as_str().to_string();
        return (raw.replace(',', "").parse().ok(), Some(raw));
    }
    (None, None)
}

/// Drop cards that fail the caller's rating or review-count filters.
///
/// A card without the filtered attribute cannot satisfy the filter and is
/// dropped.
pub fn apply_listing_filters(
    cards: &mut Vec<ListingCard>,
    rating_filter: Option<NumericFilter>,
    review_filter: Option<NumericFilter>,
) {
    if let Some(filter) = rating_filter {
        cards.retain(|card| {
            card.rating
                .is_some_and(|rating| filter.operator.matches(rating, filter.value))
        });
    }
    if let Some(filter) = review_filter {
        cards.retain(|card| {
            card.review_count
                .is_some_and(|count| filter.operator.matches(f64::from(count), filter.value))
        });
    }
}

/// Raw card shape produced by the listing evaluator.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawListing {
    url: Option<String>,
    name: Option<String>,
    rating_label: Option<String>,
    review_aria: Option<String>,
    review_sibling: Option<String>,
}

fn parse_listing(raw: RawListing) -> Option<ListingCard> {
    let url = raw.url?;
    let rating = raw.rating_label.as_deref().and_then(parse_rating);
    let (review_count, raw_review_count) =
        parse_review_count(raw.review_aria.as_deref(), raw.review_sibling.as_deref());
    Some(ListingCard {
        url,
        name: raw.name,
        rating,
        review_count,
        raw_review_count,
    })
}

const LISTING_TEMPLATE: &str = r#"
(() => {
    const cards = [];
    for (const link of document.querySelectorAll("__CARD__")) {
        const card = link.closest("div[jsaction]") || link.parentElement;
        const ratingEl = card ? card.querySelector("__RATING__") : null;
        let reviewSibling = null;
        if (ratingEl && ratingEl.parentElement) {
            reviewSibling = ratingEl.parentElement.textContent;
        }
        cards.push({
            url: link.href,
            name: link.getAttribute("aria-label"),
            ratingLabel: ratingEl ? ratingEl.getAttribute("aria-label") : null,
            reviewAria: ratingEl ? ratingEl.getAttribute("aria-label") : null,
            reviewSibling: reviewSibling,
        });
    }
    return cards;
})()
"#;

/// Evaluator that collects one raw object per result card.
static LISTING_SCRIPT: Lazy<String> = Lazy::new(|| {
    LISTING_TEMPLATE
        .replace("__CARD__", selectors::RESULT_CARD_LINK)
        .replace("__RATING__", selectors::RATING_SPAN)
});

/// Produces listing cards for a zone.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn scrape_zone(
        &self,
        zone: &Zone,
        query: &SearchQuery,
        remaining: usize,
        stop: &StopFlag,
    ) -> Result<Vec<ListingCard>>;
}

/// Listing source over the pooled browser session.
pub struct BrowserListingSource {
    session: Arc<SessionManager>,
    nav_timeout: Duration,
}

impl BrowserListingSource {
    #[must_use]
    pub fn new(session: Arc<SessionManager>, nav_timeout: Duration) -> Self {
        Self {
            session,
            nav_timeout,
        }
    }
}

#[async_trait]
impl ListingSource for BrowserListingSource {
    async fn scrape_zone(
        &self,
        zone: &Zone,
        query: &SearchQuery,
        remaining: usize,
        stop: &StopFlag,
    ) -> Result<Vec<ListingCard>> {
        // Scroll past the cap so late-loading cards that fail filters still
        // leave enough survivors.
        let target_cards = ((remaining.min(50) as f64) * 2.0).ceil() as usize;
        let nav_timeout = self.nav_timeout;
        let url = query.url.clone();
        let label = zone.label.clone();

        let cards = self
            .session
            .with_page(stop, |page| {
                let url = url.clone();
                let label = label.clone();
                let stop = stop.clone();
                async move {
                    tokio::time::timeout(nav_timeout, page.goto(url.as_str()))
                        .await
                        .map_err(|_| anyhow::anyhow!("search navigation timeout for {label}"))?
                        .context("search navigation")?;
                    // The result panel renders progressively; a load-event
                    // timeout here is not fatal.
                    let _ = tokio::time::timeout(nav_timeout, page.wait_for_navigation()).await;

                    if stop.is_set() {
                        return Ok(Vec::new());
                    }

                    scroll_results_panel(&page, target_cards, &stop).await?;

                    // Review counts render asynchronously after the cards.
                    let _ = page.find_element(selectors::RATING_SPAN).await;
                    tokio::time::sleep(Duration::from_millis(1200)).await;

                    if stop.is_set() {
                        return Ok(Vec::new());
                    }

                    let raw: Vec<RawListing> = page
                        .evaluate(LISTING_SCRIPT.as_str())
                        .await
                        .context("listing evaluation")?
                        .into_value()
                        .context("listing payload")?;
                    debug!("zone {label}: {} raw cards", raw.len());
                    Ok(raw)
                }
            })
            .await?;

        let raw = cards.unwrap_or_default();
        let mut seen = std::collections::HashSet::new();
        Ok(raw
            .into_iter()
            .filter_map(parse_listing)
            .filter(|card| seen.insert(card.url.clone()))
            .collect())
    }
}

fn scroll_step_script(magnitude: i64) -> String {
    format!(
        r#"
(() => {{
    const panel = document.querySelector("{panel}");
    if (panel) {{
        panel.scrollBy(0, {magnitude});
        return {{
            count: document.querySelectorAll("{card}").length,
            height: panel.scrollHeight,
        }};
    }}
    window.scrollBy(0, {magnitude});
    return {{
        count: document.querySelectorAll("{card}").length,
        height: document.body ? document.body.scrollHeight : 0,
    }};
}})()
"#,
        panel = selectors::RESULTS_PANEL,
        card = selectors::RESULT_CARD_LINK,
        magnitude = magnitude,
    )
}

#[derive(Debug, Deserialize)]
struct ScrollProbe {
    count: usize,
    height: i64,
}

/// Scroll the result panel until `target_cards` are loaded or growth stops.
///
/// Stagnation first triggers a small back-scroll to poke the lazy loader,
/// then progressively larger jumps. Three stagnant probes in a row end the
/// scroll.
async fn scroll_results_panel(page: &Page, target_cards: usize, stop: &StopFlag) -> Result<()> {
    const MAX_STEPS: usize = 30;

    let mut last_count = 0usize;
    let mut last_height = 0i64;
    let mut stagnant = 0u32;
    let mut magnitude: i64 = 800;

    for _ in 0..MAX_STEPS {
        if stop.is_set() {
            return Ok(());
        }

        let probe: ScrollProbe = page
            .evaluate(scroll_step_script(magnitude).as_str())
            .await
            .context("result panel scroll")?
            .into_value()
            .context("scroll probe payload")?;

        if probe.count >= target_cards {
            return Ok(());
        }

        if probe.count == last_count && probe.height == last_height {
            stagnant += 1;
            if stagnant >= 3 {
                return Ok(());
            }
            // Poke the lazy loader, then jump further on the next pass.
            let _ = page
                .evaluate(scroll_step_script(-200).as_str())
                .await
                .context("result panel back-scroll")?;
            magnitude = (magnitude + 600).min(4000);
        } else {
            stagnant = 0;
        }
        last_count = probe.count;
        last_height = probe.height;

        tokio::time::sleep(Duration::from_millis(400)).await;
    }

    Ok(())
}
