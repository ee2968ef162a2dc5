//! leadharvest: geographically-scoped business-listing extraction.
//!
//! Given a keyword and a location scope, the engine discovers candidate
//! detail pages on a map search surface, extracts structured business
//! records through a two-tier concurrent scheduler over a rotating
//! headless-browser session, and returns up to a caller-supplied cap.

pub mod browser;
pub mod config;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod geo;
pub mod job;
pub mod limiter;
pub mod records;
pub mod scheduler;

pub use browser::{PagePool, PagePoolConfig, SessionConfig, SessionManager};
pub use config::EngineConfig;
pub use dedup::{DedupStore, MemoryDedupStore, RedisDedupStore, UrlDeduper, normalize_detail_url};
pub use error::{EngineError, EngineResult};
pub use extract::{
    BrowserListingSource, DetailExtractor, ListingSource, MapsDetailExtractor, ScrapeApiClient,
};
pub use geo::{
    BoundsResolver, Candidate, CandidateBuckets, HttpBoundsResolver, PopulationResolver,
    RegionIndex, StaticPopulationIndex, StaticRegionIndex, Zone, ZoneConfig,
};
pub use job::{JobHandle, JobStatus, NullJobHandle, ProgressEvent};
pub use limiter::TaskLimiter;
pub use records::{BusinessRecord, JobParams, ListingCard, Review, SearchMeta};
pub use scheduler::{Collaborators, Engine, ProgressMonitor, StopFlag, StopReason};
