//! Listing discovery and detail extraction against the upstream site.
//!
//! The scheduler only sees the [`ListingSource`] and [`DetailExtractor`]
//! traits; the browser- and REST-backed implementations live below them.

pub mod adapter;
pub mod email;
pub mod listing;
pub mod reviews;
pub mod scrape_api;
pub mod selectors;

pub use adapter::{DetailExtractor, MapsDetailExtractor};
pub use listing::{
    BrowserListingSource, ListingSource, SearchQuery, apply_listing_filters, build_search_query,
};
pub use scrape_api::{DetailPayload, ScrapeApiClient};
