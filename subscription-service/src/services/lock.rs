//! Distributed lock used to serialize billing cycles across instances.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Shared key-value primitive with an atomic "set if absent with TTL".
///
/// A present key means some instance holds the lock; the TTL bounds how long
/// a crashed holder can block everyone else.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Set `key` to `value` only if it does not exist. `true` when acquired.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, AppError>;

    async fn delete(&self, key: &str) -> Result<(), AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct RedisLock {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisLock {
    pub async fn new(url: &str) -> Result<Self, AppError> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(url)?;

        // ConnectionManager reconnects on its own
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to get Redis connection manager");
            AppError::RedisError(e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, AppError> {
        let mut conn = self.manager.clone();

        // SET NX replies OK when set and nil when the key already exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Process-local lock with the same contract. Expiry follows the tokio
/// clock, so paused-time tests can run the TTL out.
#[derive(Default)]
pub struct InMemoryLock {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, (String, Instant)>>, AppError> {
        self.entries
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Lock table mutex poisoned: {}", e)))
    }

    /// Current holder of `key`, ignoring expired entries.
    pub fn holder(&self, key: &str) -> Option<String> {
        let entries = self.entries().ok()?;
        entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value.clone())
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.holder(key).is_some()
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, AppError> {
        let mut entries = self.entries()?;
        let now = Instant::now();

        if let Some((_, expires_at)) = entries.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
        }

        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.entries()?.remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.entries().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "billing_job_lock";

    #[tokio::test(start_paused = true)]
    async fn second_setter_is_refused_until_ttl_expires() {
        let lock = InMemoryLock::new();
        let ttl = Duration::from_secs(600);

        assert!(lock.set_if_absent(KEY, "instance-a", ttl).await.unwrap());
        assert!(!lock.set_if_absent(KEY, "instance-b", ttl).await.unwrap());
        assert_eq!(lock.holder(KEY).as_deref(), Some("instance-a"));

        tokio::time::advance(Duration::from_secs(601)).await;

        assert!(!lock.is_held(KEY));
        assert!(lock.set_if_absent(KEY, "instance-b", ttl).await.unwrap());
        assert_eq!(lock.holder(KEY).as_deref(), Some("instance-b"));
    }

    #[tokio::test]
    async fn delete_frees_the_key() {
        let lock = InMemoryLock::new();
        let ttl = Duration::from_secs(600);

        assert!(lock.set_if_absent(KEY, "instance-a", ttl).await.unwrap());
        lock.delete(KEY).await.unwrap();

        assert!(!lock.is_held(KEY));
        assert!(lock.set_if_absent(KEY, "instance-b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn deleting_an_absent_key_is_not_an_error() {
        let lock = InMemoryLock::new();
        assert!(lock.delete(KEY).await.is_ok());
    }
}
