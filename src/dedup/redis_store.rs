//! Redis-backed dedup store.
//!
//! One set per user, TTL refreshed on every mark so an active user's history
//! keeps sliding forward.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

use super::DedupStore;

/// Dedup store over a shared Redis instance.
#[derive(Clone)]
pub struct RedisDedupStore {
    manager: ConnectionManager,
    ttl: Duration,
}

impl RedisDedupStore {
    /// Connect with a managed (auto-reconnecting) connection.
    pub async fn connect(url: &str, ttl: Duration) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager, ttl })
    }

    fn key(user_id: &str) -> String {
        format!("leadharvest:seen:{user_id}")
    }

    fn ttl_secs(&self) -> i64 {
        self.ttl.as_secs().max(1) as i64
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn batch_check(&self, user_id: &str, urls: &[String]) -> anyhow::Result<Vec<bool>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SMISMEMBER");
        cmd.arg(Self::key(user_id));
        for url in urls {
            cmd.arg(url);
        }
        let flags: Vec<i64> = cmd.query_async(&mut conn).await?;
        Ok(flags.into_iter().map(|flag| flag == 1).collect())
    }

    async fn mark(&self, user_id: &str, url: &str) -> anyhow::Result<()> {
        let key = Self::key(user_id);
        let mut conn = self.manager.clone();
        let _: () = redis::pipe()
            .cmd("SADD")
            .arg(&key)
            .arg(url)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.ttl_secs())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn batch_mark(&self, user_id: &str, urls: &[String]) -> anyhow::Result<()> {
        if urls.is_empty() {
            return Ok(());
        }
        let key = Self::key(user_id);
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        for url in urls {
            pipe.cmd("SADD").arg(&key).arg(url).ignore();
        }
        pipe.cmd("EXPIRE").arg(&key).arg(self.ttl_secs()).ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}
