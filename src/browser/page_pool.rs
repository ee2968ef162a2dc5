//! Fixed-capacity pool of configured pages over one browser instance.
//!
//! `acquire` hands out an idle page, opens a new one while under capacity,
//! or queues the caller. `release` hands the page straight to the oldest
//! waiter when one exists. Closing the pool rejects all waiters and tears
//! the browser down.

use chromiumoxide::Page;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};

use super::setup;

/// Page pool configuration.
#[derive(Debug, Clone)]
pub struct PagePoolConfig {
    /// Maximum live pages.
    pub max_pages: usize,
    /// User agent applied to every new page.
    pub user_agent: String,
    /// Block images, fonts and media.
    pub block_heavy_resources: bool,
    /// Also block stylesheets.
    pub block_stylesheets: bool,
}

impl Default for PagePoolConfig {
    fn default() -> Self {
        Self {
            max_pages: crate::config::DEFAULT_POOL_MAX_PAGES,
            user_agent: super::ENGINE_USER_AGENT.to_string(),
            block_heavy_resources: true,
            block_stylesheets: false,
        }
    }
}

struct PoolState {
    available: Vec<Page>,
    created: usize,
    pending: VecDeque<oneshot::Sender<Page>>,
}

/// Pool of browser pages for one session.
pub struct PagePool {
    id: u64,
    config: PagePoolConfig,
    browser: Mutex<Browser>,
    handler: parking_lot::Mutex<Option<JoinHandle<()>>>,
    user_data_dir: parking_lot::Mutex<Option<PathBuf>>,
    state: Mutex<PoolState>,
    closed: AtomicBool,
}

impl PagePool {
    /// Launch a fresh browser and wrap it in a pool.
    pub async fn launch(id: u64, config: PagePoolConfig, headless: bool) -> EngineResult<Arc<Self>> {
        let dir = std::env::temp_dir().join(format!(
            "leadharvest_session_{id}_{}",
            std::process::id()
        ));
        let (browser, handler, user_data_dir) = setup::launch_browser(headless, Some(dir))
            .await
            .map_err(EngineError::Other)?;

        info!("page pool {id} launched (capacity {})", config.max_pages);
        Ok(Arc::new(Self {
            id,
            config,
            browser: Mutex::new(browser),
            handler: parking_lot::Mutex::new(Some(handler)),
            user_data_dir: parking_lot::Mutex::new(Some(user_data_dir)),
            state: Mutex::new(PoolState {
                available: Vec::new(),
                created: 0,
                pending: VecDeque::new(),
            }),
            closed: AtomicBool::new(false),
        }))
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Acquire a page, waiting when the pool is at capacity.
    pub async fn acquire(&self) -> EngineResult<Page> {
        if self.is_closed() {
            return Err(EngineError::PoolClosed);
        }

        let waiter = {
            let mut state = self.state.lock().await;

            // Hand out an idle page that is still alive.
            while let Some(page) = state.available.pop() {
                match page.url().await {
                    Ok(_) => return Ok(page),
                    Err(e) => {
                        debug!("pool {}: dropping dead idle page: {e}", self.id);
                        state.created = state.created.saturating_sub(1);
                    }
                }
            }

            if state.created < self.config.max_pages {
                state.created += 1;
                drop(state);
                return match self.create_page().await {
                    Ok(page) => Ok(page),
                    Err(e) => {
                        self.state.lock().await.created -= 1;
                        Err(EngineError::PageCreationFailed(format!("{e:#}")))
                    }
                };
            }

            let (sender, receiver) = oneshot::channel();
            state.pending.push_back(sender);
            receiver
        };

        match waiter.await {
            Ok(page) => Ok(page),
            // Sender dropped without a page only happens on close.
            Err(_) => Err(EngineError::PoolClosed),
        }
    }

    /// Return a page to the pool or hand it to the oldest waiter.
    pub async fn release(&self, page: Page) {
        if self.is_closed() {
            let _ = page.close().await;
            return;
        }

        let mut state = self.state.lock().await;
        let mut page = page;
        while let Some(waiter) = state.pending.pop_front() {
            match waiter.send(page) {
                Ok(()) => return,
                Err(returned) => page = returned,
            }
        }
        state.available.push(page);
    }

    /// Drop a page that died while held and reclaim its capacity slot.
    pub async fn discard(&self, page: Page) {
        let _ = page.close().await;
        let mut state = self.state.lock().await;
        state.created = state.created.saturating_sub(1);

        // A queued waiter would otherwise never be served once all live
        // pages are gone; open a replacement for it.
        if !state.pending.is_empty() && state.created < self.config.max_pages && !self.is_closed() {
            state.created += 1;
            drop(state);
            match self.create_page().await {
                Ok(fresh) => self.release(fresh).await,
                Err(e) => {
                    warn!("pool {}: replacement page failed: {e:#}", self.id);
                    self.state.lock().await.created -= 1;
                }
            }
        }
    }

    /// Close the pool: reject waiters, close pages, shut the browser down.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("closing page pool {}", self.id);

        let pages: Vec<Page> = {
            let mut state = self.state.lock().await;
            // Dropping the senders rejects every queued acquire.
            state.pending.clear();
            state.created = 0;
            state.available.drain(..).collect()
        };
        for page in pages {
            let _ = page.close().await;
        }

        {
            let mut browser = self.browser.lock().await;
            if let Err(e) = browser.close().await {
                warn!("pool {}: browser close failed: {e}", self.id);
            }
            let _ = browser.wait().await;
        }

        if let Some(handler) = self.handler.lock().take() {
            handler.abort();
        }
        if let Some(dir) = self.user_data_dir.lock().take()
            && let Err(e) = std::fs::remove_dir_all(&dir)
        {
            debug!("pool {}: leaving user data dir {}: {e}", self.id, dir.display());
        }
    }

    async fn create_page(&self) -> anyhow::Result<Page> {
        let page = {
            let browser = self.browser.lock().await;
            browser.new_page("about:blank").await?
        };

        page.execute(network::SetUserAgentOverrideParams {
            user_agent: self.config.user_agent.clone(),
            accept_language: Some("en-US,en".to_string()),
            platform: None,
            user_agent_metadata: None,
        })
        .await?;

        page.execute(
            SetDeviceMetricsOverrideParams::builder()
                .width(1920)
                .height(1080)
                .device_scale_factor(1.0)
                .mobile(false)
                .build()
                .map_err(anyhow::Error::msg)?,
        )
        .await?;

        if self.config.block_heavy_resources {
            page.execute(network::EnableParams::default()).await?;
            let mut patterns: Vec<String> = [
                ".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg", ".ico", ".woff", ".woff2",
                ".ttf", ".otf", ".mp4", ".webm", ".mp3", ".avi",
            ]
            .iter()
            .map(|ext| format!("*{ext}"))
            .collect();
            if self.config.block_stylesheets {
                patterns.push("*.css".to_string());
            }
            page.execute(network::SetBlockedUrLsParams { urls: patterns })
                .await?;
        }

        debug!("pool {}: created page", self.id);
        Ok(page)
    }
}
