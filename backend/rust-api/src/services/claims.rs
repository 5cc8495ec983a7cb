//! Atomic claim tickets guarding stage dispatch.
//!
//! A stage is dispatched at most once per guard key: the first caller to
//! claim the key runs the job, every later caller observes `false` and
//! exits. Keys are released when the guarded job reaches a terminal state
//! so an explicit retry can claim again; the Redis TTL covers a worker
//! that dies before releasing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashSet;
use std::sync::Mutex;

/// One day; generation jobs finish (or fail) well within this.
const CLAIM_TTL_SECS: u64 = 86400;

pub fn modules_claim_key(course_id: &str) -> String {
    format!("generate:modules:{}", course_id)
}

pub fn questions_claim_key(course_id: &str, module_index: u32) -> String {
    format!("generate:questions:{}:{}", course_id, module_index)
}

pub fn video_claim_key(course_id: &str, module_index: u32) -> String {
    format!("generate:video:{}:{}", course_id, module_index)
}

#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Compare-and-set on the key: `true` for the first claimant, `false`
    /// when the key is already held.
    async fn try_claim(&self, key: &str) -> Result<bool>;

    async fn release(&self, key: &str) -> Result<()>;
}

pub struct RedisClaimStore {
    redis: ConnectionManager,
}

impl RedisClaimStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl ClaimStore for RedisClaimStore {
    async fn try_claim(&self, key: &str) -> Result<bool> {
        let mut conn = self.redis.clone();

        // SET NX is atomic per key; unrelated courses never contend.
        let res: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(CLAIM_TTL_SECS)
            .query_async(&mut conn)
            .await
            .context("Failed to claim guard key")?;

        Ok(res.is_some())
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut conn = self.redis.clone();

        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .context("Failed to release guard key")?;

        Ok(())
    }
}

/// Process-local claim store for tests and single-node development.
#[derive(Default)]
pub struct MemoryClaimStore {
    held: Mutex<HashSet<String>>,
}

impl MemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClaimStore for MemoryClaimStore {
    async fn try_claim(&self, key: &str) -> Result<bool> {
        let mut held = self.held.lock().unwrap();
        Ok(held.insert(key.to_string()))
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut held = self.held.lock().unwrap();
        held.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn first_claim_wins_under_concurrency() {
        let store = Arc::new(MemoryClaimStore::new());
        let key = modules_claim_key("course-1");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let key = key.clone();
            handles.push(tokio::spawn(
                async move { store.try_claim(&key).await.unwrap() },
            ));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn release_allows_reclaim() {
        let store = MemoryClaimStore::new();
        let key = video_claim_key("course-1", 2);

        assert!(store.try_claim(&key).await.unwrap());
        assert!(!store.try_claim(&key).await.unwrap());
        store.release(&key).await.unwrap();
        assert!(store.try_claim(&key).await.unwrap());
    }

    #[test]
    fn keys_are_scoped_per_unit() {
        assert_ne!(questions_claim_key("c", 0), questions_claim_key("c", 1));
        assert_ne!(questions_claim_key("c", 0), video_claim_key("c", 0));
        assert_ne!(modules_claim_key("a"), modules_claim_key("b"));
    }
}
