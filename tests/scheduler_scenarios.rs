//! End-to-end scheduler scenarios against stub collaborators.
//!
//! No browser and no network: the listing source and detail extractor are
//! replaced with stubs so the tests exercise the scheduler's own behavior
//! (cap enforcement, dedup filtering, cancellation, stuck detection, batch
//! variety).

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use leadharvest::dedup::{DedupStore, MemoryDedupStore, UrlDeduper};
use leadharvest::extract::{DetailExtractor, ListingSource, SearchQuery};
use leadharvest::geo::bounds::{BoundsQuery, BoundsResolver};
use leadharvest::geo::zones::{GeoBounds, Zone, ZoneKind};
use leadharvest::geo::{StaticPopulationIndex, StaticRegionIndex};
use leadharvest::job::{JobHandle, JobStatus, ProgressEvent};
use leadharvest::records::{BusinessRecord, JobParams, ListingCard, SearchMeta};
use leadharvest::scheduler::{Collaborators, Engine, StopFlag};
use leadharvest::EngineConfig;

// ---------------------------------------------------------------------------
// Stub collaborators
// ---------------------------------------------------------------------------

/// Bounds resolver that always fails, forcing center-only scrapes.
struct NoBounds;

#[async_trait]
impl BoundsResolver for NoBounds {
    async fn resolve(&self, _query: &BoundsQuery) -> anyhow::Result<GeoBounds> {
        anyhow::bail!("no geocoder in tests")
    }
}

/// Bounds resolver returning a fixed box.
struct FixedBounds(GeoBounds);

#[async_trait]
impl BoundsResolver for FixedBounds {
    async fn resolve(&self, _query: &BoundsQuery) -> anyhow::Result<GeoBounds> {
        Ok(self.0)
    }
}

/// Listing source returning a fixed URL list for every zone, and recording
/// the zones it was asked about.
struct FixedListings {
    urls: Vec<String>,
    zones_seen: parking_lot::Mutex<Vec<(String, Option<ZoneKind>)>>,
}

impl FixedListings {
    fn new(urls: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            urls,
            zones_seen: parking_lot::Mutex::new(Vec::new()),
        })
    }

    fn zone_labels(&self) -> Vec<String> {
        self.zones_seen
            .lock()
            .iter()
            .map(|(label, _)| label.clone())
            .collect()
    }
}

#[async_trait]
impl ListingSource for FixedListings {
    async fn scrape_zone(
        &self,
        zone: &Zone,
        _query: &SearchQuery,
        _remaining: usize,
        _stop: &StopFlag,
    ) -> anyhow::Result<Vec<ListingCard>> {
        self.zones_seen
            .lock()
            .push((zone.label.clone(), Some(zone.kind)));
        Ok(self
            .urls
            .iter()
            .map(|url| ListingCard {
                url: url.clone(),
                name: Some("Stub Business".into()),
                rating: Some(4.5),
                review_count: Some(25),
                raw_review_count: Some("25".into()),
            })
            .collect())
    }
}

/// Listing source emitting zone-unique URLs, for batch-variety checks.
struct PerZoneListings {
    per_zone: usize,
    zones_seen: parking_lot::Mutex<Vec<String>>,
}

#[async_trait]
impl ListingSource for PerZoneListings {
    async fn scrape_zone(
        &self,
        zone: &Zone,
        _query: &SearchQuery,
        _remaining: usize,
        _stop: &StopFlag,
    ) -> anyhow::Result<Vec<ListingCard>> {
        self.zones_seen.lock().push(zone.label.clone());
        Ok((0..self.per_zone)
            .map(|index| ListingCard {
                url: format!("https://maps.example.com/maps/place/{}-{index}", zone.label),
                name: Some(format!("{}-{index}", zone.label)),
                rating: None,
                review_count: None,
                raw_review_count: None,
            })
            .collect())
    }
}

/// Extractor returning a minimal record per card, recording every URL it
/// was handed.
struct EchoExtractor {
    extracted: parking_lot::Mutex<Vec<String>>,
}

impl EchoExtractor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            extracted: parking_lot::Mutex::new(Vec::new()),
        })
    }

    fn urls(&self) -> Vec<String> {
        self.extracted.lock().clone()
    }
}

#[async_trait]
impl DetailExtractor for EchoExtractor {
    async fn extract(
        &self,
        card: &ListingCard,
        _params: &JobParams,
        meta: &SearchMeta,
        _stop: &StopFlag,
    ) -> anyhow::Result<Option<BusinessRecord>> {
        self.extracted.lock().push(card.url.clone());
        Ok(Some(BusinessRecord {
            name: card.name.clone().unwrap_or_else(|| "Stub".into()),
            url: card.url.clone(),
            search_term: meta.search_term.clone(),
            search_type: "Stub".into(),
            search_location: meta.search_location.clone(),
            ..BusinessRecord::default()
        }))
    }
}

/// Extractor that accepts tasks and never finishes them.
struct HangingExtractor;

#[async_trait]
impl DetailExtractor for HangingExtractor {
    async fn extract(
        &self,
        _card: &ListingCard,
        _params: &JobParams,
        _meta: &SearchMeta,
        _stop: &StopFlag,
    ) -> anyhow::Result<Option<BusinessRecord>> {
        futures::future::pending().await
    }
}

/// Job handle recording status transitions and progress events; reports
/// `failed` after an optional delay to simulate external cancellation.
struct RecordingJobHandle {
    fail_after: Option<Duration>,
    started: std::time::Instant,
    statuses: parking_lot::Mutex<Vec<JobStatus>>,
    events: parking_lot::Mutex<Vec<ProgressEvent>>,
}

impl RecordingJobHandle {
    fn new(fail_after: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            fail_after,
            started: std::time::Instant::now(),
            statuses: parking_lot::Mutex::new(Vec::new()),
            events: parking_lot::Mutex::new(Vec::new()),
        })
    }

    fn statuses(&self) -> Vec<JobStatus> {
        self.statuses.lock().clone()
    }

    fn completed_events(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.status.as_deref() == Some("completed"))
            .count()
    }
}

#[async_trait]
impl JobHandle for RecordingJobHandle {
    async fn status(&self) -> Option<JobStatus> {
        match self.fail_after {
            Some(delay) if self.started.elapsed() >= delay => Some(JobStatus::Failed),
            _ => Some(JobStatus::Active),
        }
    }

    async fn update_status(&self, status: JobStatus) -> anyhow::Result<()> {
        self.statuses.lock().push(status);
        Ok(())
    }

    async fn update_progress(&self, event: ProgressEvent) -> anyhow::Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wiring helpers
// ---------------------------------------------------------------------------

fn params(max_records: Option<usize>) -> JobParams {
    JobParams {
        keyword: "dentist".into(),
        country_code: "US".into(),
        state_code: Some("CA".into()),
        city: Some("Fresno".into()),
        max_records,
        rating_filter: None,
        review_filter: None,
        review_time_range: None,
        is_extract_email: false,
        is_validate: false,
        extract_negative_reviews: false,
        avoid_duplicate: false,
        only_without_website: false,
        user_id: None,
    }
}

fn test_config() -> EngineConfig {
    EngineConfig {
        stuck_grace_period: Duration::from_millis(100),
        ..EngineConfig::default()
    }
}

struct Wiring {
    job: Arc<RecordingJobHandle>,
    dedup: Arc<MemoryDedupStore>,
    bounds: Arc<dyn BoundsResolver>,
    listings: Arc<dyn ListingSource>,
    details: Arc<dyn DetailExtractor>,
}

fn engine(config: EngineConfig, wiring: Wiring) -> Engine {
    Engine::new(
        config,
        Collaborators {
            job: wiring.job,
            dedup: wiring.dedup,
            regions: Arc::new(StaticRegionIndex::new()),
            populations: Arc::new(StaticPopulationIndex::new()),
            bounds: wiring.bounds,
            listings: wiring.listings,
            details: wiring.details,
            session: None,
        },
    )
}

fn place_urls(count: usize) -> Vec<String> {
    (0..count)
        .map(|index| format!("https://maps.example.com/maps/place/biz-{index}"))
        .collect()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn record_cap_wins() {
    let job = RecordingJobHandle::new(None);
    let dedup = Arc::new(MemoryDedupStore::new());
    let listings = FixedListings::new(place_urls(10));
    let details = EchoExtractor::new();

    let mut params = params(Some(3));
    params.user_id = Some("u1".into());

    let engine = engine(
        test_config(),
        Wiring {
            job: job.clone(),
            dedup: dedup.clone(),
            bounds: Arc::new(NoBounds),
            listings: listings.clone(),
            details: details.clone(),
        },
    );

    let records = engine.run(params).await.expect("run");
    assert_eq!(records.len(), 3);

    // Marks land in the detail tasks; give detached stragglers a moment.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(dedup.count_for("u1"), 3);

    // Exactly three tier-B tasks ran.
    assert_eq!(details.urls().len(), 3);
}

#[tokio::test]
async fn results_never_duplicate_a_url() {
    let job = RecordingJobHandle::new(None);
    let listings = FixedListings::new(place_urls(5));
    let details = EchoExtractor::new();

    let engine = engine(
        test_config(),
        Wiring {
            job: job.clone(),
            dedup: Arc::new(MemoryDedupStore::new()),
            bounds: Arc::new(NoBounds),
            listings: listings.clone(),
            details: details.clone(),
        },
    );

    let records = engine.run(params(Some(50))).await.expect("run");
    let mut urls: Vec<_> = records.iter().map(|record| record.url.clone()).collect();
    urls.sort();
    urls.dedup();
    assert_eq!(urls.len(), records.len(), "duplicate URL in results");
}

#[tokio::test]
async fn stuck_detection_flips_job_status() {
    let job = RecordingJobHandle::new(None);
    let listings = FixedListings::new(place_urls(5));

    let config = EngineConfig {
        stuck_records_timeout: Duration::from_secs(1),
        stuck_percentage_timeout: Duration::from_secs(1),
        stuck_grace_period: Duration::from_millis(100),
        ..EngineConfig::default()
    };

    let engine = engine(
        config,
        Wiring {
            job: job.clone(),
            dedup: Arc::new(MemoryDedupStore::new()),
            bounds: Arc::new(NoBounds),
            listings,
            details: Arc::new(HangingExtractor),
        },
    );

    let started = std::time::Instant::now();
    let records = tokio::time::timeout(Duration::from_secs(20), engine.run(params(Some(10))))
        .await
        .expect("run returned")
        .expect("run ok");

    assert!(records.is_empty());
    assert!(job.statuses().contains(&JobStatus::StuckTimeout));
    // One watchdog tick past the stuck timeout, plus the grace period.
    assert!(started.elapsed() < Duration::from_secs(15));
}

#[tokio::test]
async fn external_cancellation_stops_scheduling() {
    let job = RecordingJobHandle::new(Some(Duration::from_millis(500)));
    let listings = FixedListings::new(place_urls(5));

    let engine = engine(
        test_config(),
        Wiring {
            job: job.clone(),
            dedup: Arc::new(MemoryDedupStore::new()),
            bounds: Arc::new(NoBounds),
            listings,
            details: Arc::new(HangingExtractor),
        },
    );

    let started = std::time::Instant::now();
    // Unbounded cap: only cancellation can end this run.
    let records = tokio::time::timeout(Duration::from_secs(20), engine.run(params(None)))
        .await
        .expect("run returned")
        .expect("run ok");

    assert!(records.is_empty());
    // Cancelled runs do not emit a completed event.
    assert_eq!(job.completed_events(), 0);
    assert!(started.elapsed() < Duration::from_secs(15));
}

#[tokio::test]
async fn durable_dedup_filters_before_tier_b() {
    let job = RecordingJobHandle::new(None);
    let dedup = Arc::new(MemoryDedupStore::new());
    let urls = place_urls(4);

    // User already has the first two URLs.
    let deduper = UrlDeduper::new(dedup.clone() as Arc<dyn DedupStore>);
    deduper.mark("u7", &urls[0]).await;
    deduper.mark("u7", &urls[1]).await;

    let listings = FixedListings::new(urls.clone());
    let details = EchoExtractor::new();

    let mut params = params(Some(10));
    params.avoid_duplicate = true;
    params.user_id = Some("u7".into());

    let engine = engine(
        test_config(),
        Wiring {
            job,
            dedup,
            bounds: Arc::new(NoBounds),
            listings,
            details: details.clone(),
        },
    );

    let records = engine.run(params).await.expect("run");
    assert_eq!(records.len(), 2);

    let mut extracted = details.urls();
    extracted.sort();
    assert_eq!(extracted, vec![urls[2].clone(), urls[3].clone()]);
}

#[tokio::test]
async fn zero_max_records_completes_immediately() {
    let job = RecordingJobHandle::new(None);
    let listings = FixedListings::new(place_urls(5));

    let engine = engine(
        test_config(),
        Wiring {
            job: job.clone(),
            dedup: Arc::new(MemoryDedupStore::new()),
            bounds: Arc::new(NoBounds),
            listings: listings.clone(),
            details: EchoExtractor::new(),
        },
    );

    let records = engine.run(params(Some(0))).await.expect("run");
    assert!(records.is_empty());
    assert_eq!(job.completed_events(), 1);
    // Nothing was scraped.
    assert!(listings.zone_labels().is_empty());
}

#[tokio::test]
async fn geocode_failure_means_center_only() {
    let job = RecordingJobHandle::new(None);
    let listings = FixedListings::new(place_urls(2));

    let engine = engine(
        test_config(),
        Wiring {
            job,
            dedup: Arc::new(MemoryDedupStore::new()),
            bounds: Arc::new(NoBounds),
            listings: listings.clone(),
            details: EchoExtractor::new(),
        },
    );

    engine.run(params(Some(10))).await.expect("run");

    let zones = listings.zones_seen.lock().clone();
    assert_eq!(zones.len(), 1);
    assert_eq!(zones[0].1, Some(ZoneKind::Center));
}

#[tokio::test]
async fn invalid_country_fails_fast() {
    let engine = engine(
        test_config(),
        Wiring {
            job: RecordingJobHandle::new(None),
            dedup: Arc::new(MemoryDedupStore::new()),
            bounds: Arc::new(NoBounds),
            listings: FixedListings::new(place_urls(1)),
            details: EchoExtractor::new(),
        },
    );

    let mut params = params(Some(5));
    params.country_code = "ZZ".into();
    let error = engine.run(params).await.expect_err("invalid country");
    assert!(format!("{error}").contains("unknown country code"));
}

#[tokio::test]
async fn batched_zone_order_varies_between_runs() {
    let bounds = GeoBounds {
        north: 36.9,
        south: 36.6,
        east: -119.6,
        west: -119.95,
        center_lat: 36.75,
        center_lng: -119.77,
    };

    let run_order = |_attempt: usize| async {
        let listings = Arc::new(PerZoneListings {
            per_zone: 1,
            zones_seen: parking_lot::Mutex::new(Vec::new()),
        });
        let config = EngineConfig {
            zone_batch_size: 10,
            ..test_config()
        };
        let engine = engine(
            config,
            Wiring {
                job: RecordingJobHandle::new(None),
                dedup: Arc::new(MemoryDedupStore::new()),
                bounds: Arc::new(FixedBounds(bounds)),
                listings: listings.clone(),
                details: EchoExtractor::new(),
            },
        );
        engine.run(params(None)).await.expect("run");
        listings.zones_seen.lock().clone()
    };

    // Random batch start plus per-batch shuffles: two identical orders are
    // overwhelmingly unlikely, but allow one retry to keep this stable.
    let first = run_order(0).await;
    assert!(first.len() > 10, "expected a multi-batch grid");
    let mut varied = false;
    for attempt in 1..=2 {
        let other = run_order(attempt).await;
        if other != first {
            varied = true;
            break;
        }
    }
    assert!(varied, "zone order identical across runs");
}
