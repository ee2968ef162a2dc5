//! Email extraction from a business website.
//!
//! Prefers explicit `mailto:` links, then falls back to scanning the page
//! text. File-looking matches (image names, minified asset paths) are
//! rejected.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
        .unwrap_or_else(|e| panic!("email regex: {e}"))
});

const REJECTED_SUFFIXES: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg", ".css", ".js"];

fn plausible(candidate: &str) -> bool {
    let lower = candidate.to_lowercase();
    !REJECTED_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// Extract the first plausible email address out of a page.
#[must_use]
pub fn extract_email_from_html(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    if let Ok(mailto) = Selector::parse("a[href^='mailto:']") {
        for anchor in document.select(&mailto) {
            if let Some(href) = anchor.value().attr("href") {
                let address = href
                    .trim_start_matches("mailto:")
                    .split('?')
                    .next()
                    .unwrap_or("")
                    .trim();
                if EMAIL_RE.is_match(address) && plausible(address) {
                    return Some(address.to_string());
                }
            }
        }
    }

    let text: String = document.root_element().text().collect::<Vec<_>>().join(" ");
    EMAIL_RE
        .find_iter(&text)
        .map(|m| m.as_str().to_string())
        .find(|candidate| plausible(candidate))
}
