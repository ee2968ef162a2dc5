//! Property tests for detail-URL normalization.

use leadharvest::normalize_detail_url;
use proptest::prelude::*;

proptest! {
    /// Normalization is idempotent for arbitrary place URLs.
    #[test]
    fn normalize_is_idempotent(
        host in "[a-z]{3,10}\\.(com|io|net)",
        path in "[a-z0-9/+-]{0,30}",
        id in "[a-zA-Z0-9:]{4,24}",
        noise in "[a-z0-9=&]{0,20}",
    ) {
        let url = format!("https://{host}/maps/place/{path}?data=!4m6!3m5!1s{id}!8m2&{noise}");
        let once = normalize_detail_url(&url);
        prop_assert_eq!(normalize_detail_url(&once), once);
    }

    /// Two URLs sharing a place identifier normalize to the same string,
    /// whatever else their data parameter carries.
    #[test]
    fn same_place_id_collapses(
        id in "[a-zA-Z0-9:]{4,24}",
        prefix_a in "(!([0-9]{1,2})m([0-9]{1,2})){0,3}",
        prefix_b in "(!([0-9]{1,2})m([0-9]{1,2})){0,3}",
    ) {
        let a = format!("https://maps.example.com/maps/place/x?data={prefix_a}!1s{id}!8m2");
        let b = format!("https://maps.example.com/maps/place/x?data={prefix_b}!1s{id}!9m1&hl=de");
        prop_assert_eq!(normalize_detail_url(&a), normalize_detail_url(&b));
    }

    /// Normalization never panics on arbitrary input.
    #[test]
    fn never_panics(raw in ".{0,200}") {
        let _ = normalize_detail_url(&raw);
    }
}
