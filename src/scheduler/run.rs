//! Two-tier scrape orchestration.
//!
//! Tier A discovers detail URLs per zone; tier B turns URLs into records.
//! Both tiers run under independent concurrency limiters, share one stop
//! flag, and report through the progress monitor. Recoverable failures stay
//! inside the scope loop; a run always returns the records it managed to
//! collect.

use dashmap::DashSet;
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::browser::SessionManager;
use crate::config::EngineConfig;
use crate::dedup::{DedupStore, UrlDeduper};
use crate::error::{EngineError, EngineResult};
use crate::extract::{DetailExtractor, ListingSource, apply_listing_filters, build_search_query};
use crate::geo::bounds::{BoundsQuery, BoundsResolver};
use crate::geo::population::{CandidateBuckets, PopulationResolver};
use crate::geo::regions::{RegionIndex, validate_country};
use crate::geo::zones::{Zone, ZoneConfig, ZoneKind, ZoneScope, generate_zone_batch};
use crate::job::{JobHandle, JobStatus, ProgressEvent, StuckDetection};
use crate::limiter::TaskLimiter;
use crate::records::{BusinessRecord, JobParams, ListingCard, SearchMeta};

use super::progress::ProgressMonitor;
use super::stop::{StopFlag, StopReason};
use super::tasks::{DetailTaskRegistry, TaskTicket};
use super::watchdog;

/// External collaborators wired into an engine.
pub struct Collaborators {
    pub job: Arc<dyn JobHandle>,
    pub dedup: Arc<dyn DedupStore>,
    pub regions: Arc<dyn RegionIndex>,
    pub populations: Arc<dyn PopulationResolver>,
    pub bounds: Arc<dyn BoundsResolver>,
    pub listings: Arc<dyn ListingSource>,
    pub details: Arc<dyn DetailExtractor>,
    /// Closed at run end when the engine owns a browser session.
    pub session: Option<Arc<SessionManager>>,
}

/// The extraction engine. One `run` handles one job.
pub struct Engine {
    config: EngineConfig,
    collaborators: Collaborators,
}

/// Shared state of one run.
pub(crate) struct RunContext {
    pub(crate) config: EngineConfig,
    pub(crate) params: JobParams,
    pub(crate) country: String,
    pub(crate) max_records: usize,
    pub(crate) stop: StopFlag,
    pub(crate) results: parking_lot::Mutex<Vec<BusinessRecord>>,
    pub(crate) seen_urls: DashSet<String>,
    pub(crate) processed_zones: DashSet<String>,
    pub(crate) registry: Arc<DetailTaskRegistry>,
    pub(crate) monitor: ProgressMonitor,
    pub(crate) deduper: UrlDeduper,
    pub(crate) job: Arc<dyn JobHandle>,
    pub(crate) listings: Arc<dyn ListingSource>,
    pub(crate) details: Arc<dyn DetailExtractor>,
    pub(crate) bounds: Arc<dyn BoundsResolver>,
    pub(crate) limit_city: TaskLimiter,
    pub(crate) limit_detail: TaskLimiter,
    pub(crate) detail_handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    pub(crate) started: tokio::time::Instant,
    pub(crate) planned_zones: AtomicUsize,
    pub(crate) current_location: parking_lot::Mutex<Option<String>>,
}

impl RunContext {
    pub(crate) fn records_len(&self) -> usize {
        self.results.lock().len()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.max_records.saturating_sub(self.records_len())
    }

    /// Record-based when the cap is finite, zone-based otherwise. Caps at
    /// 99 until the terminal event.
    pub(crate) fn percentage(&self) -> f64 {
        if self.max_records != usize::MAX {
            (self.records_len() as f64 / self.max_records as f64 * 100.0).min(99.0)
        } else {
            let planned = self.planned_zones.load(Ordering::SeqCst).max(1);
            (self.processed_zones.len() as f64 / planned as f64 * 100.0).min(99.0)
        }
    }

    /// Append a record unless the run is stopping or the cap is reached.
    /// Reaching the cap here is what sets the quota stop trigger.
    pub(crate) async fn push_result(&self, record: BusinessRecord) -> bool {
        let pushed = {
            let mut results = self.results.lock();
            if self.stop.is_set() || results.len() >= self.max_records {
                false
            } else {
                results.push(record);
                if results.len() >= self.max_records {
                    self.stop.trigger(StopReason::RecordCapReached);
                }
                true
            }
        };
        if pushed {
            self.emit_progress().await;
        }
        pushed
    }

    /// Stream a progress observation through the monitor and the job handle.
    pub(crate) async fn emit_progress(&self) {
        let records = self.records_len();
        let percentage = self.percentage();
        let check = self.monitor.update(records, percentage);

        let stuck_detection = check.metric.map(|metric| StuckDetection {
            reason: metric.as_str().to_string(),
            stuck_for_ms: check.stuck_for.as_millis() as u64,
        });
        if check.is_stuck && self.stop.trigger(StopReason::Stuck) {
            warn!("run stuck ({:?} for {:?})", check.metric, check.stuck_for);
            if let Err(error) = self.job.update_status(JobStatus::StuckTimeout).await {
                debug!("status update failed: {error:#}");
            }
        }

        let event = ProgressEvent {
            percentage,
            records_collected: records,
            max_records: (self.max_records != usize::MAX).then_some(self.max_records),
            current_location: self.current_location.lock().clone(),
            stuck_detection,
            status: None,
        };
        if let Err(error) = self.job.update_progress(event).await {
            debug!("progress update failed: {error:#}");
        }
    }

    /// Terminal progress event; bypasses the monitor.
    pub(crate) async fn emit_final_progress(&self, percentage: f64) {
        let event = ProgressEvent {
            percentage,
            records_collected: self.records_len(),
            max_records: (self.max_records != usize::MAX).then_some(self.max_records),
            current_location: None,
            stuck_detection: None,
            status: Some("completed".to_string()),
        };
        if let Err(error) = self.job.update_progress(event).await {
            debug!("final progress update failed: {error:#}");
        }
    }

    fn zone_key(&self, zone: &Zone) -> String {
        let mut key = format!(
            "{}|{}|{}",
            self.country,
            zone.state_code.as_deref().unwrap_or(""),
            zone.city_name.as_deref().unwrap_or(""),
        );
        if let Some(coords) = &zone.coords {
            key.push_str(&format!("|{:.4}|{:.4}", coords.lat, coords.lng));
        } else {
            key.push('|');
            key.push_str(&zone.label);
        }
        key
    }
}

/// One tier-A pass over a zone: discover listings, filter, hand survivors
/// to tier B.
async fn scrape_zone(ctx: Arc<RunContext>, zone: Zone) {
    if ctx.stop.is_set() {
        return;
    }
    let key = ctx.zone_key(&zone);
    if !ctx.processed_zones.insert(key) {
        return;
    }

    let location_label;
    {
        let mut current = ctx.current_location.lock();
        location_label = zone
            .city_name
            .clone()
            .or_else(|| zone.state_name.clone())
            .unwrap_or_else(|| ctx.country.clone());
        *current = Some(location_label.clone());
    }

    let remaining = ctx.remaining();
    if remaining == 0 {
        ctx.stop.trigger(StopReason::RecordCapReached);
        return;
    }

    let query = build_search_query(&ctx.params.keyword, &ctx.country, &zone);
    let mut cards = match ctx
        .listings
        .scrape_zone(&zone, &query, remaining, &ctx.stop)
        .await
    {
        Ok(cards) => cards,
        Err(error) => {
            if ctx.stop.is_set() {
                info!("zone {} abandoned during shutdown: {error:#}", zone.label);
            } else {
                warn!("zone {} failed: {error:#}", zone.label);
            }
            return;
        }
    };
    if ctx.stop.is_set() {
        return;
    }
    debug!("zone {}: {} cards before filters", zone.label, cards.len());

    apply_listing_filters(&mut cards, ctx.params.rating_filter, ctx.params.review_filter);

    // Durable per-user dedup, before tier-B scheduling.
    if ctx.params.avoid_duplicate
        && let Some(user_id) = &ctx.params.user_id
    {
        let urls: Vec<String> = cards.iter().map(|card| card.url.clone()).collect();
        let seen = ctx.deduper.batch_check(user_id, &urls).await;
        cards = cards
            .into_iter()
            .zip(seen)
            .filter_map(|(card, seen)| (!seen).then_some(card))
            .collect();
    }

    let meta = SearchMeta {
        search_term: ctx.params.keyword.clone(),
        search_location: query.location_label.clone(),
    };

    let remaining = ctx.remaining();
    let mut scheduled = 0usize;
    for card in cards {
        if ctx.stop.is_set() || scheduled >= remaining {
            break;
        }
        // This-run dedup: at most one tier-B task per URL.
        if !ctx.seen_urls.insert(card.url.clone()) {
            continue;
        }
        if schedule_detail(&ctx, card, meta.clone()) {
            scheduled += 1;
        } else {
            break;
        }
    }
    ctx.emit_progress().await;
}

/// Schedule one tier-B extraction. Returns `false` once the cap leaves no
/// room for more in-flight work.
fn schedule_detail(ctx: &Arc<RunContext>, card: ListingCard, meta: SearchMeta) -> bool {
    if ctx.records_len() + ctx.registry.active_count() >= ctx.max_records {
        return false;
    }

    let ticket = ctx.registry.register(&card.url);
    let needs_page = ctx.details.needs_page(&ctx.params);
    let task_ctx = Arc::clone(ctx);

    let handle = tokio::spawn(async move {
        if needs_page {
            let limiter = task_ctx.limit_detail.clone();
            let inner_ctx = Arc::clone(&task_ctx);
            limiter
                .run(run_detail_task(inner_ctx, card, meta, ticket))
                .await;
        } else {
            // REST-only tasks skip the page limiter; the scrape API client
            // bounds them on its own.
            run_detail_task(task_ctx, card, meta, ticket).await;
        }
    });
    ctx.detail_handles.lock().push(handle);
    true
}

async fn run_detail_task(
    ctx: Arc<RunContext>,
    card: ListingCard,
    meta: SearchMeta,
    ticket: TaskTicket,
) {
    if ctx.stop.is_set() {
        ticket.complete();
        return;
    }
    ticket.activate();

    match ctx
        .details
        .extract(&card, &ctx.params, &meta, &ctx.stop)
        .await
    {
        Ok(Some(record)) => {
            if ctx.params.only_without_website && record.website.is_some() {
                ticket.complete();
                return;
            }
            let pushed = ctx.push_result(record).await;
            // Mark regardless of whether dedup filtering was enabled.
            if pushed && let Some(user_id) = &ctx.params.user_id {
                ctx.deduper.mark(user_id, &card.url).await;
            }
            ticket.complete();
        }
        Ok(None) => ticket.complete(),
        Err(error) => {
            if ctx.stop.is_set() {
                info!("detail task for {} ended during shutdown: {error:#}", card.url);
            } else {
                warn!("detail task for {} failed: {error:#}", card.url);
            }
            ticket.fail();
        }
    }
}

/// Resolve bounds for a scope and build its zone config, falling back to a
/// center-only scrape when geocoding fails or yields nothing usable.
async fn build_zone_config(ctx: &RunContext, scope: ZoneScope, deep: bool) -> ZoneConfig {
    let batch_size = ctx.config.zone_batch_size;
    let max_zones = ctx.config.max_total_zones;
    if !deep {
        return ZoneConfig::center_only(scope, batch_size, max_zones);
    }

    let query = match &scope {
        ZoneScope::City {
            city, state_code, ..
        } => BoundsQuery {
            city: Some(city.clone()),
            state: state_code.clone(),
            country: ctx.country.clone(),
        },
        ZoneScope::State { state_code, .. } => BoundsQuery {
            city: None,
            state: Some(state_code.clone()),
            country: ctx.country.clone(),
        },
        ZoneScope::Country { .. } => BoundsQuery {
            city: None,
            state: None,
            country: ctx.country.clone(),
        },
    };

    match ctx.bounds.resolve(&query).await {
        Ok(bounds) if bounds.area_km2() > f64::EPSILON => {
            ZoneConfig::with_bounds(scope, bounds, batch_size, max_zones)
        }
        Ok(_) => {
            debug!("zero-area bounds for {:?}, center-only", query.to_query_string());
            ZoneConfig::center_only(scope, batch_size, max_zones)
        }
        Err(error) => {
            warn!(
                "bounds resolution failed for {:?}, center-only: {error:#}",
                query.to_query_string()
            );
            ZoneConfig::center_only(scope, batch_size, max_zones)
        }
    }
}

/// Batched zone loop: center zone first, then batches from a random start
/// with wrap-around, zones shuffled and run in parallel under the city
/// limiter.
async fn run_zone_config(ctx: &Arc<RunContext>, config: ZoneConfig) {
    ctx.planned_zones
        .fetch_add(config.planned_zones() + 1, Ordering::SeqCst);

    scrape_zone(Arc::clone(ctx), config.center_zone()).await;

    let total_batches = config.total_batches();
    if total_batches == 0 {
        return;
    }
    let start_batch = rand::rng().random_range(0..total_batches);
    let mut processed_batches = HashSet::new();

    for step in 0..total_batches {
        if ctx.stop.is_set() || ctx.remaining() == 0 {
            break;
        }
        let batch_number = (start_batch + step) % total_batches;
        if !processed_batches.insert(batch_number) {
            continue;
        }

        let mut zones = generate_zone_batch(&config, batch_number);
        zones.shuffle(&mut rand::rng());
        debug!("batch {batch_number}: {} zones", zones.len());

        let tasks = zones.into_iter().map(|zone| {
            let ctx = Arc::clone(ctx);
            async move {
                let zone_ctx = Arc::clone(&ctx);
                ctx.limit_city.run(scrape_zone(zone_ctx, zone)).await;
            }
        });
        futures::future::join_all(tasks).await;
    }
}

/// Bucketed candidate loop: big cities first, every candidate a name-based
/// center zone under the city limiter.
async fn run_buckets(ctx: &Arc<RunContext>, buckets: CandidateBuckets) {
    ctx.planned_zones.fetch_add(buckets.len(), Ordering::SeqCst);

    for (bucket_name, candidates) in buckets.ordered() {
        if ctx.stop.is_set() || ctx.remaining() == 0 {
            break;
        }
        debug!("bucket {bucket_name}: {} candidates", candidates.len());

        let tasks = candidates.iter().cloned().map(|candidate| {
            let ctx = Arc::clone(ctx);
            async move {
                let zone = Zone {
                    kind: ZoneKind::Center,
                    label: format!(
                        "{}-center",
                        candidate.city_name.to_lowercase().replace(' ', "-")
                    ),
                    city_name: Some(candidate.city_name),
                    state_code: candidate.state_code,
                    state_name: candidate.state_name,
                    coords: None,
                };
                let zone_ctx = Arc::clone(&ctx);
                ctx.limit_city.run(scrape_zone(zone_ctx, zone)).await;
            }
        });
        futures::future::join_all(tasks).await;
    }
}

impl Engine {
    #[must_use]
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
        }
    }

    /// Run one job to completion and return up to `max_records` records.
    pub async fn run(&self, params: JobParams) -> EngineResult<Vec<BusinessRecord>> {
        params.validate()?;
        let country = validate_country(&params.country_code)?;

        if let Some(state) = &params.state_code {
            let states = self
                .collaborators
                .regions
                .states_of(&country)
                .await
                .unwrap_or_default();
            if !states.is_empty() && !states.iter().any(|s| s.code.eq_ignore_ascii_case(state)) {
                return Err(EngineError::InvalidState {
                    country,
                    state: state.clone(),
                });
            }
        }

        let max_records = params.effective_max_records();
        if max_records == 0 {
            let event = ProgressEvent {
                percentage: 100.0,
                records_collected: 0,
                max_records: Some(0),
                current_location: None,
                stuck_detection: None,
                status: Some("completed".to_string()),
            };
            let _ = self.collaborators.job.update_progress(event).await;
            return Ok(Vec::new());
        }

        let ctx = Arc::new(RunContext {
            config: self.config.clone(),
            country: country.clone(),
            max_records,
            stop: StopFlag::new(),
            results: parking_lot::Mutex::new(Vec::new()),
            seen_urls: DashSet::new(),
            processed_zones: DashSet::new(),
            registry: DetailTaskRegistry::new(self.config.task_stuck_timeout),
            monitor: ProgressMonitor::new(
                self.config.stuck_records_timeout,
                self.config.stuck_percentage_timeout,
            ),
            deduper: UrlDeduper::new(self.collaborators.dedup.clone()),
            job: self.collaborators.job.clone(),
            listings: self.collaborators.listings.clone(),
            details: self.collaborators.details.clone(),
            bounds: self.collaborators.bounds.clone(),
            limit_city: TaskLimiter::new(self.config.city_concurrency),
            limit_detail: TaskLimiter::new(self.config.detail_concurrency),
            detail_handles: parking_lot::Mutex::new(Vec::new()),
            started: tokio::time::Instant::now(),
            planned_zones: AtomicUsize::new(0),
            current_location: parking_lot::Mutex::new(None),
            params,
        });

        info!(
            "run started: keyword={:?} scope={}/{:?}/{:?} cap={}",
            ctx.params.keyword,
            country,
            ctx.params.state_code,
            ctx.params.city,
            if max_records == usize::MAX {
                "unbounded".to_string()
            } else {
                max_records.to_string()
            }
        );

        let watchdog_handle = watchdog::spawn(Arc::clone(&ctx));
        self.run_scope(&ctx).await;

        // Drain tier-B work, cutting the wait short if a stop trigger
        // lands while draining. Detached tasks observe the flag on their
        // own; after a stuck signal they get a grace period first.
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *ctx.detail_handles.lock());
        if !ctx.stop.is_set() {
            let mut drain = Box::pin(futures::future::join_all(handles));
            tokio::select! {
                _ = &mut drain => {}
                _ = ctx.stop.wait() => {}
            }
        }
        if matches!(ctx.stop.reason(), Some(StopReason::Stuck)) {
            tokio::time::sleep(self.config.stuck_grace_period).await;
        }

        watchdog_handle.abort();

        if let Some(session) = &self.collaborators.session {
            session.close().await;
        }

        let cancelled = matches!(ctx.stop.reason(), Some(StopReason::Cancelled));
        if !cancelled {
            let percentage = match ctx.stop.reason() {
                None | Some(StopReason::RecordCapReached) => 100.0,
                _ => ctx.percentage(),
            };
            ctx.emit_final_progress(percentage).await;
        }

        let mut results = std::mem::take(&mut *ctx.results.lock());
        if max_records != usize::MAX {
            results.truncate(max_records);
        }
        info!("run finished with {} records", results.len());
        Ok(results)
    }

    async fn run_scope(&self, ctx: &Arc<RunContext>) {
        let city = ctx.params.city.clone();
        let state = ctx.params.state_code.clone();

        match (city, state) {
            (Some(city), state_code) => {
                let scope = ZoneScope::City {
                    city,
                    state_code,
                    country_code: ctx.country.clone(),
                };
                let config = build_zone_config(ctx, scope, true).await;
                run_zone_config(ctx, config).await;
            }
            (None, Some(state_code)) => {
                let cities = self
                    .collaborators
                    .regions
                    .cities_of_state(&ctx.country, &state_code)
                    .await
                    .unwrap_or_default();
                let buckets = CandidateBuckets::build(
                    cities,
                    self.collaborators.populations.as_ref(),
                    &ctx.country,
                    Some(ctx.config.min_population),
                );
                if buckets.is_empty() {
                    let state_name = self
                        .collaborators
                        .regions
                        .states_of(&ctx.country)
                        .await
                        .ok()
                        .and_then(|states| {
                            states
                                .into_iter()
                                .find(|s| s.code.eq_ignore_ascii_case(&state_code))
                                .map(|s| s.name)
                        });
                    let scope = ZoneScope::State {
                        state_code,
                        state_name,
                        country_code: ctx.country.clone(),
                    };
                    let config = build_zone_config(ctx, scope, true).await;
                    run_zone_config(ctx, config).await;
                } else {
                    run_buckets(ctx, buckets).await;
                }
            }
            (None, None) => {
                let cities = self
                    .collaborators
                    .regions
                    .cities_of_country(&ctx.country)
                    .await
                    .unwrap_or_default();
                let buckets = CandidateBuckets::build(
                    cities,
                    self.collaborators.populations.as_ref(),
                    &ctx.country,
                    Some(ctx.config.min_population),
                );
                if buckets.is_empty() {
                    let scope = ZoneScope::Country {
                        country_code: ctx.country.clone(),
                    };
                    let config = build_zone_config(ctx, scope, true).await;
                    run_zone_config(ctx, config).await;
                } else {
                    run_buckets(ctx, buckets).await;
                }
            }
        }
    }
}
