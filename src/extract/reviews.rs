//! Review extraction on a detail page.
//!
//! Switches the page to the reviews tab, optionally sorts by lowest rating,
//! scrolls the panel until it stops growing, then parses and filters the
//! collected entries. Relative dates ("2 months ago") are converted to
//! approximate ISO dates at parse time.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chromiumoxide::Page;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

use crate::records::Review;
use crate::scheduler::stop::StopFlag;

use super::listing::parse_rating;
use super::selectors;

/// What to keep out of the collected reviews.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewFilter {
    /// Only reviews within this many years of now.
    pub time_range_years: Option<u8>,
    /// Only 1- and 2-star reviews.
    pub negative_only: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReview {
    text: Option<String>,
    rating_label: Option<String>,
    relative_date: Option<String>,
    reviewer: Option<String>,
}

const REVIEWS_TEMPLATE: &str = r#"
(() => {
    const out = [];
    for (const item of document.querySelectorAll("__ITEM__")) {
        const textEl = item.querySelector("__TEXT__");
        const ratingEl = item.querySelector("__RATING__");
        const dateEl = item.querySelector("__DATE__");
        const authorEl = item.querySelector("__AUTHOR__");
        out.push({
            text: textEl ? textEl.textContent : null,
            ratingLabel: ratingEl ? ratingEl.getAttribute("aria-label") : null,
            relativeDate: dateEl ? dateEl.textContent : null,
            reviewer: authorEl ? authorEl.textContent : null,
        });
    }
    return out;
})()
"#;

static REVIEWS_SCRIPT: once_cell::sync::Lazy<String> = once_cell::sync::Lazy::new(|| {
    REVIEWS_TEMPLATE
        .replace("__ITEM__", selectors::REVIEW_ITEM)
        .replace("__TEXT__", selectors::REVIEW_TEXT)
        .replace("__RATING__", selectors::RATING_SPAN)
        .replace("__DATE__", selectors::REVIEW_DATE)
        .replace("__AUTHOR__", selectors::REVIEW_AUTHOR)
});

fn reviews_scroll_script(magnitude: i64) -> String {
    format!(
        r#"
(() => {{
    const panel = document.querySelector("{panel}");
    if (panel) {{
        panel.scrollBy(0, {magnitude});
        return {{
            count: document.querySelectorAll("{item}").length,
            height: panel.scrollHeight,
        }};
    }}
    return {{ count: document.querySelectorAll("{item}").length, height: 0 }};
}})()
"#,
        panel = selectors::REVIEWS_PANEL,
        item = selectors::REVIEW_ITEM,
        magnitude = magnitude,
    )
}

#[derive(Debug, Deserialize)]
struct ScrollProbe {
    count: usize,
    height: i64,
}

/// Convert a relative date like "3 months ago" to an approximate ISO date.
#[must_use]
pub fn relative_date_to_iso(now: DateTime<Utc>, relative: &str) -> String {
    let lower = relative.trim().to_lowercase();
    let mut parts = lower.split_whitespace();
    let amount: i64 = match parts.next() {
        Some("a") | Some("an") => 1,
        Some(raw) => raw.parse().unwrap_or(0),
        None => 0,
    };
    let unit = parts.next().unwrap_or("");

    let delta = if unit.starts_with("year") {
        ChronoDuration::days(amount * 365)
    } else if unit.starts_with("month") {
        ChronoDuration::days(amount * 30)
    } else if unit.starts_with("week") {
        ChronoDuration::days(amount * 7)
    } else if unit.starts_with("day") {
        ChronoDuration::days(amount)
    } else if unit.starts_with("hour") {
        ChronoDuration::hours(amount)
    } else if unit.starts_with("minute") {
        ChronoDuration::minutes(amount)
    } else {
        ChronoDuration::zero()
    };

    (now - delta).format("%Y-%m-%d").to_string()
}

/// Filter, deduplicate and order collected reviews.
///
/// Dedup key is (text, rating, reviewer). Time-window and negative-only
/// filters apply when requested.
#[must_use]
pub fn filter_reviews(reviews: Vec<Review>, filter: ReviewFilter, now: DateTime<Utc>) -> Vec<Review> {
    let cutoff = filter
        .time_range_years
        .map(|years| now - ChronoDuration::days(i64::from(years) * 365));

    let mut seen = HashSet::new();
    reviews
        .into_iter()
        .filter(|review| {
            if filter.negative_only && !(review.rating == 1 || review.rating == 2) {
                return false;
            }
            if let Some(cutoff) = cutoff {
                let within = chrono::NaiveDate::parse_from_str(&review.date, "%Y-%m-%d")
                    .map(|date| date >= cutoff.date_naive())
                    .unwrap_or(true);
                if !within {
                    return false;
                }
            }
            seen.insert((
                review.text.clone(),
                review.rating,
                review.reviewer_name.clone(),
            ))
        })
        .collect()
}

/// Extract filtered reviews from an already-navigated detail page.
pub async fn extract_reviews(
    page: &Page,
    filter: ReviewFilter,
    stop: &StopFlag,
) -> Result<Vec<Review>> {
    // Switch to the reviews tab when the page has one.
    if let Ok(tab) = page.find_element(selectors::REVIEWS_TAB).await {
        tab.click().await.context("clicking reviews tab")?;
        tokio::time::sleep(Duration::from_millis(800)).await;
    }

    // Wait for the panel to render.
    let wait_started = tokio::time::Instant::now();
    while page.find_element(selectors::REVIEWS_PANEL).await.is_err() {
        if wait_started.elapsed() > Duration::from_secs(5) || stop.is_set() {
            debug!("reviews panel never appeared");
            return Ok(Vec::new());
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    if filter.negative_only {
        // Best effort; the default order still gets filtered afterwards.
        if let Ok(sort) = page.find_element(selectors::REVIEWS_SORT_BUTTON).await
            && sort.click().await.is_ok()
        {
            tokio::time::sleep(Duration::from_millis(400)).await;
            if let Ok(lowest) = page.find_element(selectors::REVIEWS_SORT_LOWEST).await {
                let _ = lowest.click().await;
                tokio::time::sleep(Duration::from_millis(800)).await;
            }
        }
    }

    scroll_reviews_panel(page, stop).await?;

    let raw: Vec<RawReview> = page
        .evaluate(REVIEWS_SCRIPT.as_str())
        .await
        .context("review evaluation")?
        .into_value()
        .context("review payload")?;

    let now = Utc::now();
    let reviews = raw
        .into_iter()
        .filter_map(|raw| {
            let rating = raw.rating_label.as_deref().and_then(parse_rating)? as u8;
            let relative = raw.relative_date.unwrap_or_default();
            Some(Review {
                text: raw.text.unwrap_or_default().trim().to_string(),
                rating,
                date: relative_date_to_iso(now, &relative),
                relative_date: relative,
                reviewer_name: raw.reviewer.unwrap_or_default().trim().to_string(),
            })
        })
        .collect();

    Ok(filter_reviews(reviews, filter, now))
}

/// Scroll the reviews panel until the entry count and height are stable for
/// three probes or the step cap is reached.
async fn scroll_reviews_panel(page: &Page, stop: &StopFlag) -> Result<()> {
    const MAX_STEPS: usize = 40;

    let mut last_count = 0usize;
    let mut last_height = 0i64;
    let mut stable = 0u32;

    for _ in 0..MAX_STEPS {
        if stop.is_set() {
            return Ok(());
        }

        let probe: ScrollProbe = page
            .evaluate(reviews_scroll_script(1200).as_str())
            .await
            .context("reviews scroll")?
            .into_value()
            .context("reviews scroll payload")?;

        if probe.count == last_count && probe.height == last_height {
            stable += 1;
            if stable >= 3 {
                return Ok(());
            }
        } else {
            stable = 0;
        }
        last_count = probe.count;
        last_height = probe.height;

        tokio::time::sleep(Duration::from_millis(350)).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn review(text: &str, rating: u8, date: &str, reviewer: &str) -> Review {
        Review {
            text: text.into(),
            rating,
            date: date.into(),
            relative_date: String::new(),
            reviewer_name: reviewer.into(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).single().expect("valid timestamp")
    }

    #[test]
    fn relative_dates_convert() {
        let now = now();
        assert_eq!(relative_date_to_iso(now, "2 days ago"), "2026-07-30");
        assert_eq!(relative_date_to_iso(now, "a month ago"), "2026-07-02");
        assert_eq!(relative_date_to_iso(now, "3 years ago"), "2023-08-02");
        // Unrecognized text falls back to today.
        assert_eq!(relative_date_to_iso(now, "just now"), "2026-08-01");
    }

    #[test]
    fn negative_filter_keeps_one_and_two_stars() {
        let reviews = vec![
            review("bad", 1, "2026-07-01", "a"),
            review("meh", 3, "2026-07-01", "b"),
            review("poor", 2, "2026-07-01", "c"),
        ];
        let kept = filter_reviews(
            reviews,
            ReviewFilter {
                time_range_years: None,
                negative_only: true,
            },
            now(),
        );
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|r| r.rating <= 2));
    }

    #[test]
    fn time_window_filters_old_reviews() {
        let reviews = vec![
            review("recent", 4, "2026-01-15", "a"),
            review("ancient", 4, "2019-01-15", "b"),
        ];
        let kept = filter_reviews(
            reviews,
            ReviewFilter {
                time_range_years: Some(2),
                negative_only: false,
            },
            now(),
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text, "recent");
    }

    #[test]
    fn duplicate_reviews_collapse() {
        let reviews = vec![
            review("same", 5, "2026-07-01", "a"),
            review("same", 5, "2026-07-02", "a"),
            review("same", 4, "2026-07-01", "a"),
        ];
        let kept = filter_reviews(reviews, ReviewFilter::default(), now());
        assert_eq!(kept.len(), 2);
    }
}
