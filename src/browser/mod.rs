//! Headless-browser plumbing: launch, the page pool and the rotating
//! session that owns it.

pub mod page_pool;
pub mod session;
pub mod setup;

pub use page_pool::{PagePool, PagePoolConfig};
pub use session::{SessionConfig, SessionManager, is_session_error};

/// User agent presented by pooled pages and engine HTTP clients.
pub const ENGINE_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";
