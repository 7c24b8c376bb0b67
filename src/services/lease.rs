use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager as RedisConnectionManager;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::AppResult;

const LEASE_KEY: &str = "dockyard:monitor:leader";

/// Extend the lease only while we still own it
const RENEW_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Single-holder lease electing the Monitor leader
#[async_trait]
pub trait LeaderLease: Send + Sync {
    /// Acquire the lease, or renew it when `owner` already holds it.
    /// Returns whether `owner` is the leader afterwards.
    async fn acquire_or_renew(&self, owner: &str, ttl: Duration) -> AppResult<bool>;

    async fn release(&self, owner: &str) -> AppResult<()>;
}

#[derive(Clone)]
pub struct RedisLease {
    conn: RedisConnectionManager,
}

impl RedisLease {
    pub fn new(conn: RedisConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl LeaderLease for RedisLease {
    async fn acquire_or_renew(&self, owner: &str, ttl: Duration) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let ttl_ms = ttl.as_millis() as u64;

        let renewed: i64 = redis::cmd("EVAL")
            .arg(RENEW_SCRIPT)
            .arg(1)
            .arg(LEASE_KEY)
            .arg(owner)
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        if renewed == 1 {
            return Ok(true);
        }

        let acquired: Option<String> = redis::cmd("SET")
            .arg(LEASE_KEY)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(acquired.is_some())
    }

    async fn release(&self, owner: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("EVAL")
            .arg(RELEASE_SCRIPT)
            .arg(1)
            .arg(LEASE_KEY)
            .arg(owner)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

/// Process-local lease, for tests
#[derive(Clone, Default)]
pub struct InMemoryLease {
    holder: Arc<Mutex<Option<(String, Instant)>>>,
}

impl InMemoryLease {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaderLease for InMemoryLease {
    async fn acquire_or_renew(&self, owner: &str, ttl: Duration) -> AppResult<bool> {
        let mut holder = self.holder.lock().await;
        let now = Instant::now();

        let free = match holder.as_ref() {
            None => true,
            Some((current, expires)) => current == owner || *expires <= now,
        };
        if free {
            *holder = Some((owner.to_string(), now + ttl));
        }
        Ok(free)
    }

    async fn release(&self, owner: &str) -> AppResult<()> {
        let mut holder = self.holder.lock().await;
        if holder.as_ref().is_some_and(|(current, _)| current == owner) {
            *holder = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_leader() {
        let lease = InMemoryLease::new();
        let ttl = Duration::from_secs(10);

        assert!(lease.acquire_or_renew("monitor-a", ttl).await.unwrap());
        assert!(!lease.acquire_or_renew("monitor-b", ttl).await.unwrap());
        // Renewal by the holder
        assert!(lease.acquire_or_renew("monitor-a", ttl).await.unwrap());

        lease.release("monitor-b").await.unwrap();
        assert!(!lease.acquire_or_renew("monitor-b", ttl).await.unwrap());

        lease.release("monitor-a").await.unwrap();
        assert!(lease.acquire_or_renew("monitor-b", ttl).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_can_be_taken() {
        let lease = InMemoryLease::new();

        assert!(lease
            .acquire_or_renew("monitor-a", Duration::from_secs(1))
            .await
            .unwrap());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(lease
            .acquire_or_renew("monitor-b", Duration::from_secs(1))
            .await
            .unwrap());
    }
}
