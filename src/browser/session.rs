//! Rotating browser session over the page pool.
//!
//! A session is one browser plus its pool, with a TTL. Rotation swaps in a
//! freshly launched pool, waits for in-flight page holders to drain, then
//! closes the old pool. Pages remember the pool they came from so a lease
//! taken before a rotation still releases into the right pool.

use anyhow::Result;
use chromiumoxide::Page;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::scheduler::stop::StopFlag;

use super::page_pool::{PagePool, PagePoolConfig};

/// Session manager configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_age: Duration,
    pub drain_timeout: Duration,
    pub retry_limit: u32,
    pub headless: bool,
    pub pool: PagePoolConfig,
}

impl SessionConfig {
    #[must_use]
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            max_age: config.session_max_age,
            drain_timeout: config.session_drain_timeout,
            retry_limit: config.session_retry_limit,
            headless: config.headless,
            pool: PagePoolConfig {
                max_pages: config.pool_max_pages,
                user_agent: super::ENGINE_USER_AGENT.to_string(),
                block_heavy_resources: config.block_heavy_resources,
                block_stylesheets: config.block_stylesheets,
            },
        }
    }
}

/// A page checked out of the session, tagged with its originating pool.
pub struct PageLease {
    page: Page,
    pool: Arc<PagePool>,
}

impl PageLease {
    /// Clone of the page handle for use inside the lease's lifetime.
    #[must_use]
    pub fn page(&self) -> Page {
        self.page.clone()
    }

    #[must_use]
    pub fn pool_id(&self) -> u64 {
        self.pool.id()
    }
}

struct SessionState {
    pool: Arc<PagePool>,
    started: tokio::time::Instant,
}

/// Owns the current pool and rotates it on TTL or session-class errors.
pub struct SessionManager {
    config: SessionConfig,
    state: parking_lot::RwLock<SessionState>,
    active_pages: AtomicUsize,
    /// Serializes rotations; a caller that waited on it piggybacks on the
    /// rotation that just finished instead of starting another.
    rotation_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    next_pool_id: AtomicU64,
    closed: AtomicBool,
}

impl SessionManager {
    /// Launch the initial session.
    pub async fn launch(config: SessionConfig) -> EngineResult<Arc<Self>> {
        let pool = PagePool::launch(0, config.pool.clone(), config.headless).await?;
        Ok(Arc::new(Self {
            config,
            state: parking_lot::RwLock::new(SessionState {
                pool,
                started: tokio::time::Instant::now(),
            }),
            active_pages: AtomicUsize::new(0),
            rotation_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            next_pool_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }))
    }

    fn current_pool(&self) -> Arc<PagePool> {
        self.state.read().pool.clone()
    }

    /// Pages currently checked out.
    #[must_use]
    pub fn active_pages(&self) -> usize {
        self.active_pages.load(Ordering::SeqCst)
    }

    /// Completed rotations since launch.
    #[must_use]
    pub fn rotations(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Acquire a page lease, retrying against the new pool when a rotation
    /// closes the one we were queued on.
    pub async fn acquire(&self) -> EngineResult<PageLease> {
        self.active_pages.fetch_add(1, Ordering::SeqCst);
        match self.acquire_inner().await {
            Ok(lease) => Ok(lease),
            Err(error) => {
                self.active_pages.fetch_sub(1, Ordering::SeqCst);
                Err(error)
            }
        }
    }

    async fn acquire_inner(&self) -> EngineResult<PageLease> {
        let mut retries = 0;
        loop {
            let pool = self.current_pool();
            match pool.acquire().await {
                Ok(page) => return Ok(PageLease { page, pool }),
                Err(EngineError::PoolClosed) if retries < 2 => {
                    let current = self.current_pool();
                    if current.id() == pool.id() {
                        // Not a rotation, the session itself is gone.
                        return Err(EngineError::PoolClosed);
                    }
                    retries += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Release a lease back to the pool it was drawn from.
    pub async fn release(&self, lease: PageLease) {
        lease.pool.release(lease.page).await;
        self.active_pages.fetch_sub(1, Ordering::SeqCst);
    }

    /// Drop a lease whose page is no longer usable.
    pub async fn discard(&self, lease: PageLease) {
        lease.pool.discard(lease.page).await;
        self.active_pages.fetch_sub(1, Ordering::SeqCst);
    }

    /// Rotate when the session has outlived its TTL.
    pub async fn ensure_active(&self) -> EngineResult<()> {
        let age = self.state.read().started.elapsed();
        if age >= self.config.max_age {
            self.rotate("session ttl reached").await?;
        }
        Ok(())
    }

    /// Swap in a fresh pool, drain holders of the old one, close it.
    pub async fn rotate(&self, reason: &str) -> EngineResult<()> {
        let generation_before = self.generation.load(Ordering::SeqCst);
        let _guard = self.rotation_lock.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation_before {
            // Someone rotated while we waited on the lock.
            return Ok(());
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::PoolClosed);
        }

        info!("rotating browser session: {reason}");
        let pool_id = self.next_pool_id.fetch_add(1, Ordering::SeqCst);
        let fresh = PagePool::launch(pool_id, self.config.pool.clone(), self.config.headless).await?;

        let previous = {
            let mut state = self.state.write();
            let previous = std::mem::replace(&mut state.pool, fresh);
            state.started = tokio::time::Instant::now();
            previous
        };
        self.generation.fetch_add(1, Ordering::SeqCst);

        let deadline = tokio::time::Instant::now() + self.config.drain_timeout;
        while self.active_pages.load(Ordering::SeqCst) > 0
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let still_held = self.active_pages.load(Ordering::SeqCst);
        if still_held > 0 {
            warn!("force-closing previous session pool with {still_held} pages still held");
        }
        previous.close().await;
        Ok(())
    }

    /// Run `operation` with a pooled page, rotating and retrying on
    /// session-class errors. Returns `None` when the stop flag was set
    /// before the operation could run.
    pub async fn with_page<T, F, Fut>(&self, stop: &StopFlag, operation: F) -> Result<Option<T>>
    where
        F: Fn(Page) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if stop.is_set() {
            return Ok(None);
        }

        let mut attempt = 0;
        loop {
            self.ensure_active().await?;
            let lease = self.acquire().await?;
            let page = lease.page();
            let result = operation(page).await;
            match result {
                Ok(value) => {
                    self.release(lease).await;
                    return Ok(Some(value));
                }
                Err(error) if is_session_error(&error) => {
                    self.discard(lease).await;
                    if attempt >= self.config.retry_limit {
                        return Err(error);
                    }
                    attempt += 1;
                    warn!("session-class error, rotating (attempt {attempt}): {error:#}");
                    self.rotate("session-class error").await?;
                    if stop.is_set() {
                        return Ok(None);
                    }
                }
                Err(error) => {
                    self.release(lease).await;
                    return Err(error);
                }
            }
        }
    }

    /// Close the session for good. Aborts in-flight navigations.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _guard = self.rotation_lock.lock().await;
        self.current_pool().close().await;
    }
}

/// Error texts that mean the browser session is no longer usable.
static SESSION_ERROR_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\b408\b",
        r"websocket",
        r"target (closed|crashed|detached)",
        r"session (closed|not found)",
        r"browser (closed|disconnected|crashed)",
        r"execution context (was destroyed|destroyed)",
        r"detached frame",
        r"protocol error",
        r"connection (closed|reset|refused)",
        r"channel closed",
        r"page pool closed",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Classify an error as session-class (recoverable by rotation).
#[must_use]
pub fn is_session_error(error: &anyhow::Error) -> bool {
    let text = format!("{error:#}").to_lowercase();
    SESSION_ERROR_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_session_errors() {
        for message in [
            "HTTP 408 from upstream",
            "WebSocket connection closed",
            "Target closed before response",
            "Browser disconnected unexpectedly",
            "Execution context was destroyed",
            "protocol error: invalid frame",
        ] {
            assert!(is_session_error(&anyhow::anyhow!("{message}")), "{message}");
        }
    }

    #[test]
    fn ordinary_errors_are_not_session_class() {
        for message in ["HTTP 404 not found", "missing name element", "parse failure"] {
            assert!(!is_session_error(&anyhow::anyhow!("{message}")), "{message}");
        }
    }
}
