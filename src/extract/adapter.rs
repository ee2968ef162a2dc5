//! Detail extraction adapter.
//!
//! Two paths share one output contract. The REST path covers the common
//! case; the page path is only taken when review extraction was requested,
//! since that needs a live DOM. Either way the adapter returns `None` for
//! a record it drops, and the scheduler treats that as a no-op.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::browser::SessionManager;
use crate::records::{BusinessRecord, JobParams, ListingCard, SearchMeta};
use crate::scheduler::stop::StopFlag;

use super::email::extract_email_from_html;
use super::reviews::{ReviewFilter, extract_reviews};
use super::scrape_api::{DetailPayload, ScrapeApiClient};

/// Produces a business record from a detail URL.
#[async_trait]
pub trait DetailExtractor: Send + Sync {
    /// Whether extraction for these parameters needs a browser page. Tasks
    /// that do not are scheduled outside the detail limiter.
    fn needs_page(&self, params: &JobParams) -> bool {
        params.review_time_range.is_some() || params.extract_negative_reviews
    }

    /// Extract one record. `None` means the record was dropped or skipped;
    /// the scheduler appends nothing and marks nothing.
    async fn extract(
        &self,
        card: &ListingCard,
        params: &JobParams,
        meta: &SearchMeta,
        stop: &StopFlag,
    ) -> Result<Option<BusinessRecord>>;
}

/// Production adapter over the scrape API and the browser session.
pub struct MapsDetailExtractor {
    api: Arc<ScrapeApiClient>,
    session: Option<Arc<SessionManager>>,
    detail_nav_timeout: Duration,
}

impl MapsDetailExtractor {
    /// Adapter-defined search surface name stamped into records.
    pub const SEARCH_TYPE: &'static str = "Google Maps";

    #[must_use]
    pub fn new(
        api: Arc<ScrapeApiClient>,
        session: Option<Arc<SessionManager>>,
        detail_nav_timeout: Duration,
    ) -> Self {
        Self {
            api,
            session,
            detail_nav_timeout,
        }
    }

    fn build_record(
        payload: &DetailPayload,
        card: &ListingCard,
        meta: &SearchMeta,
    ) -> Option<BusinessRecord> {
        // Name is the one required field.
        let name = payload.text("name").or_else(|| card.name.clone())?;

        let rating = payload
            .text("rating")
            .and_then(|raw| raw.parse().ok())
            .or(card.rating);
        let rating_count = payload
            .text("rating_count")
            .or_else(|| card.raw_review_count.clone());

        Some(BusinessRecord {
            name,
            phone: payload.text("phone"),
            website: payload.text("website"),
            email: None,
            email_status: None,
            address: payload.text("address"),
            latitude: payload.latitude,
            longitude: payload.longitude,
            rating,
            rating_count,
            category: payload.text("category"),
            search_term: meta.search_term.clone(),
            search_type: Self::SEARCH_TYPE.to_string(),
            search_location: meta.search_location.clone(),
            url: card.url.clone(),
            filtered_reviews: None,
            filtered_review_count: None,
        })
    }

    /// REST-only extraction plus optional email enrichment.
    async fn extract_base(
        &self,
        card: &ListingCard,
        params: &JobParams,
        meta: &SearchMeta,
    ) -> Result<Option<BusinessRecord>> {
        let payload = self.api.fetch_detail(&card.url).await?;
        let Some(mut record) = Self::build_record(&payload, card, meta) else {
            debug!("dropping {}: no name parsed", card.url);
            return Ok(None);
        };

        if params.is_extract_email {
            if let Some(website) = record.website.clone() {
                match self.api.fetch_site_text(&website).await {
                    Ok(body) => match extract_email_from_html(&body) {
                        Some(email) => {
                            record.email = Some(email);
                            record.email_status = Some("found".to_string());
                        }
                        None => record.email_status = Some("not_found".to_string()),
                    },
                    Err(error) => {
                        debug!("email fetch failed for {website}: {error:#}");
                        record.email_status = Some("not_found".to_string());
                    }
                }
            } else {
                record.email_status = Some("not_found".to_string());
            }
        }

        Ok(Some(record))
    }

    /// Page path: base record plus review extraction on the live page.
    async fn extract_with_reviews(
        &self,
        card: &ListingCard,
        params: &JobParams,
        meta: &SearchMeta,
        stop: &StopFlag,
    ) -> Result<Option<BusinessRecord>> {
        let Some(session) = &self.session else {
            warn!("review extraction requested without a browser session, using REST path");
            return self.extract_base(card, params, meta).await;
        };

        let Some(mut record) = self.extract_base(card, params, meta).await? else {
            return Ok(None);
        };

        let filter = ReviewFilter {
            time_range_years: params.review_time_range,
            negative_only: params.extract_negative_reviews,
        };
        let nav_timeout = self.detail_nav_timeout;
        let url = card.url.clone();

        let reviews = session
            .with_page(stop, |page| {
                let url = url.clone();
                let stop = stop.clone();
                async move {
                    // Primary navigation; one retry with a longer window for
                    // pages that trickle resources.
                    let first = tokio::time::timeout(nav_timeout, page.goto(url.as_str())).await;
                    match first {
                        Ok(result) => {
                            result.context("detail navigation")?;
                        }
                        Err(_) => {
                            let extended = nav_timeout + Duration::from_secs(10);
                            tokio::time::timeout(extended, page.goto(url.as_str()))
                                .await
                                .map_err(|_| {
                                    anyhow::anyhow!("detail navigation timeout for {url}")
                                })?
                                .context("detail navigation retry")?;
                            let _ =
                                tokio::time::timeout(extended, page.wait_for_navigation()).await;
                        }
                    }

                    if stop.is_set() {
                        return Ok(Vec::new());
                    }
                    extract_reviews(&page, filter, &stop).await
                }
            })
            .await?;

        if let Some(reviews) = reviews
            && !reviews.is_empty()
        {
            record.filtered_review_count = Some(reviews.len());
            record.filtered_reviews = Some(reviews);
        }

        Ok(Some(record))
    }
}

#[async_trait]
impl DetailExtractor for MapsDetailExtractor {
    async fn extract(
        &self,
        card: &ListingCard,
        params: &JobParams,
        meta: &SearchMeta,
        stop: &StopFlag,
    ) -> Result<Option<BusinessRecord>> {
        if stop.is_set() {
            return Ok(None);
        }
        if self.needs_page(params) {
            self.extract_with_reviews(card, params, meta, stop).await
        } else {
            self.extract_base(card, params, meta).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn payload(entries: &[(&str, &str)]) -> DetailPayload {
        DetailPayload {
            elements: entries
                .iter()
                .map(|(k, v)| ((*k).to_string(), Some((*v).to_string())))
                .collect::<HashMap<_, _>>(),
            latitude: Some(36.75),
            longitude: Some(-119.77),
        }
    }

    fn card() -> ListingCard {
        ListingCard {
            url: "https://maps.example.com/maps/place/acme".into(),
            name: Some("Acme Dental".into()),
            rating: Some(4.2),
            review_count: Some(120),
            raw_review_count: Some("120".into()),
        }
    }

    fn meta() -> SearchMeta {
        SearchMeta {
            search_term: "dentist".into(),
            search_location: "Fresno, CA, US".into(),
        }
    }

    #[test]
    fn record_requires_a_name() {
        let mut card = card();
        card.name = None;
        let empty = DetailPayload::default();
        assert!(MapsDetailExtractor::build_record(&empty, &card, &meta()).is_none());
    }

    #[test]
    fn payload_name_wins_over_card() {
        let payload = payload(&[("name", "Acme Dental Group"), ("rating", "4.6")]);
        let record =
            MapsDetailExtractor::build_record(&payload, &card(), &meta()).expect("record");
        assert_eq!(record.name, "Acme Dental Group");
        assert_eq!(record.rating, Some(4.6));
        assert_eq!(record.search_type, "Google Maps");
        assert_eq!(record.latitude, Some(36.75));
    }

    #[test]
    fn card_values_fill_payload_gaps() {
        let payload = payload(&[("name", "Acme")]);
        let record =
            MapsDetailExtractor::build_record(&payload, &card(), &meta()).expect("record");
        assert_eq!(record.rating, Some(4.2));
        assert_eq!(record.rating_count.as_deref(), Some("120"));
        assert_eq!(record.website, None);
    }
}
