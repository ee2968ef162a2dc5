//! Upstream DOM selectors, all in one place.
//!
//! The listing site's class names are volatile; nothing outside this module
//! mentions them. Adjusting to an upstream DOM change should only ever touch
//! this file.

use serde_json::{Value, json};

/// Base of the map search surface.
pub const SEARCH_BASE_URL: &str = "https://www.google.com/maps/search";

/// Scrollable panel holding result cards.
pub const RESULTS_PANEL: &str = "div[role='feed']";

/// Anchor of one result card.
pub const RESULT_CARD_LINK: &str = "a[href*='/maps/place/']";

/// Star-rating element inside a card or the detail header.
pub const RATING_SPAN: &str = "span[role='img']";

/// Detail page title.
pub const DETAIL_TITLE: &str = "h1.DUwDvf";

/// Tab that switches the detail page to reviews.
pub const REVIEWS_TAB: &str = "button[aria-label*='Reviews']";

/// Scrollable reviews container.
pub const REVIEWS_PANEL: &str = "div.m6QErb.DxyBCb";

/// One review entry.
pub const REVIEW_ITEM: &str = "div[data-review-id]";

/// Review body text.
pub const REVIEW_TEXT: &str = "span.wiI7pd";

/// Reviewer display name.
pub const REVIEW_AUTHOR: &str = "div.d4r55";

/// Relative date of a review.
pub const REVIEW_DATE: &str = "span.rsqaWe";

/// Sort menu opener on the reviews tab.
pub const REVIEWS_SORT_BUTTON: &str = "button[aria-label*='Sort']";

/// "Lowest rating" entry of the sort menu.
pub const REVIEWS_SORT_LOWEST: &str = "div[role='menuitemradio'][data-index='3']";

/// Element selectors sent to the detail-scrape API, keyed by record field.
#[must_use]
pub fn detail_elements() -> Value {
    json!([
        { "name": "name", "selector": DETAIL_TITLE },
        { "name": "category", "selector": "button.DkEaL" },
        { "name": "address", "selector": "button[data-item-id='address']" },
        { "name": "phone", "selector": "button[data-item-id^='phone']" },
        { "name": "website", "selector": "a[data-item-id='authority']", "attribute": "href" },
        { "name": "rating", "selector": "div.F7nice span[aria-hidden='true']" },
        { "name": "rating_count", "selector": "div.F7nice span[aria-label]" },
    ])
}
