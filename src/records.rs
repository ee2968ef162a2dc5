//! Job parameters and the extracted business record shapes.
//!
//! These are the typed contracts between the scheduler, the extraction
//! adapter and the caller. Evaluator output is deserialized straight into
//! these types; the adapter returns `None` for records it drops.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Comparison operator for listing-card filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    /// Apply the operator to `lhs` against the filter value `rhs`.
    #[must_use]
    pub fn matches(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Gt => lhs > rhs,
            Self::Gte => lhs >= rhs,
            Self::Lt => lhs < rhs,
            Self::Lte => lhs <= rhs,
        }
    }
}

/// A numeric filter applied to listing cards at discovery time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NumericFilter {
    pub operator: FilterOp,
    pub value: f64,
}

/// Parameters for one extraction job.
///
/// `max_records` of `None` means unbounded; the wall-clock and stuck
/// deadlines are then the only stop conditions besides cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobParams {
    pub keyword: String,
    pub country_code: String,
    #[serde(default)]
    pub state_code: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub max_records: Option<usize>,
    #[serde(default)]
    pub rating_filter: Option<NumericFilter>,
    #[serde(default)]
    pub review_filter: Option<NumericFilter>,
    /// Only keep reviews newer than this many years.
    #[serde(default)]
    pub review_time_range: Option<u8>,
    #[serde(default)]
    pub is_extract_email: bool,
    #[serde(default)]
    pub is_validate: bool,
    #[serde(default)]
    pub extract_negative_reviews: bool,
    #[serde(default)]
    pub avoid_duplicate: bool,
    #[serde(default)]
    pub only_without_website: bool,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl JobParams {
    /// Validate parameter ranges. Fatal for the run when this fails.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.keyword.trim().is_empty() {
            return Err(EngineError::InvalidFilter("keyword must be non-empty".into()));
        }
        if let Some(filter) = &self.rating_filter
            && !(0.0..=5.0).contains(&filter.value)
        {
            return Err(EngineError::InvalidFilter(format!(
                "rating filter value {} outside [0, 5]",
                filter.value
            )));
        }
        if let Some(filter) = &self.review_filter
            && !(0.0..=10_000.0).contains(&filter.value)
        {
            return Err(EngineError::InvalidFilter(format!(
                "review filter value {} outside [0, 10000]",
                filter.value
            )));
        }
        if let Some(years) = self.review_time_range
            && years > 10
        {
            return Err(EngineError::InvalidFilter(format!(
                "review time range {years} outside [0, 10] years"
            )));
        }
        Ok(())
    }

    /// Record cap as a concrete count.
    #[must_use]
    pub fn effective_max_records(&self) -> usize {
        self.max_records.unwrap_or(usize::MAX)
    }
}

/// A single review kept after filtering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Review {
    pub text: String,
    pub rating: u8,
    /// ISO-8601 date derived from the relative date on the page.
    pub date: String,
    pub relative_date: String,
    #[serde(rename = "reviewerName")]
    pub reviewer_name: String,
}

/// The extracted business record.
///
/// `name` is the only required field; the adapter drops the record entirely
/// when it cannot be parsed. `rating_count` stays a string to preserve the
/// upstream formatting.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BusinessRecord {
    pub name: String,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub email: Option<String>,
    pub email_status: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub rating: Option<f64>,
    pub rating_count: Option<String>,
    pub category: Option<String>,
    pub search_term: String,
    pub search_type: String,
    pub search_location: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filtered_reviews: Option<Vec<Review>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filtered_review_count: Option<usize>,
}

/// One listing card parsed out of a tier-A result panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingCard {
    pub url: String,
    pub name: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    /// Review count as it appeared on the page.
    pub raw_review_count: Option<String>,
}

/// Search context a record is attributed to.
#[derive(Debug, Clone)]
pub struct SearchMeta {
    pub search_term: String,
    pub search_location: String,
}
