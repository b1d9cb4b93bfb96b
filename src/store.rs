//! Backends for the shared set of cooled-down identities.

use crate::error::Error;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashSet;
use std::sync::Mutex;

/// A named, unordered set of strings shared by all submissions.
///
/// Implementations make no atomicity promise across calls; `add` must be a set union
/// so that concurrent writers of the same member converge.
#[async_trait]
pub trait CooldownStore: Send + Sync {
    /// Returns every member of the set.
    async fn members(&self) -> Result<HashSet<String>, Error>;

    /// Adds `member`, doing nothing if it is already present.
    async fn add(&self, member: &str) -> Result<(), Error>;

    /// Removes all members.
    async fn clear(&self) -> Result<(), Error>;
}

/// Set kept in a Redis key.
pub struct RedisStore {
    conn: ConnectionManager,
    key: String,
}

impl RedisStore {
    /// Connects to `url` and binds the store to the set at `key`.
    pub async fn connect(url: &str, key: impl Into<String>) -> Result<Self, Error> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            key: key.into(),
        })
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("key", &self.key).finish()
    }
}

#[async_trait]
impl CooldownStore for RedisStore {
    async fn members(&self) -> Result<HashSet<String>, Error> {
        let mut conn = self.conn.clone();
        let members: HashSet<String> = conn.smembers(&self.key).await?;
        Ok(members)
    }

    async fn add(&self, member: &str) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.sadd(&self.key, member).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(&self.key).await?;
        Ok(())
    }
}

/// Process-local set, for single-instance deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    members: Mutex<HashSet<String>>,
}

impl MemoryStore {
    #[cfg(test)]
    pub fn with_members<'a>(members: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            members: Mutex::new(members.into_iter().map(str::to_string).collect()),
        }
    }
}

#[async_trait]
impl CooldownStore for MemoryStore {
    async fn members(&self) -> Result<HashSet<String>, Error> {
        let members = self.members.lock().map_err(|_| Error::StoreLock)?;
        Ok(members.clone())
    }

    async fn add(&self, member: &str) -> Result<(), Error> {
        let mut members = self.members.lock().map_err(|_| Error::StoreLock)?;
        members.insert(member.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<(), Error> {
        let mut members = self.members.lock().map_err(|_| Error::StoreLock)?;
        members.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testresult::TestResult;

    #[tokio::test]
    async fn test_memory_store_is_a_set() -> TestResult {
        let store = MemoryStore::default();
        assert!(store.members().await?.is_empty());

        store.add("1.2.3.4").await?;
        store.add("1.2.3.4").await?;
        store.add("5.6.7.8").await?;
        assert_eq!(store.members().await?.len(), 2);

        store.clear().await?;
        assert!(store.members().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    #[ignore = "needs a running redis, set REDIS_URL"]
    async fn test_redis_store() -> TestResult {
        let url = std::env::var("REDIS_URL")?;
        let store = RedisStore::connect(&url, "contactmail-test-set").await?;
        store.clear().await?;

        store.add("1.2.3.4").await?;
        store.add("1.2.3.4").await?;
        store.add("1700000000000").await?;
        let members = store.members().await?;
        assert_eq!(members.len(), 2);
        assert!(members.contains("1.2.3.4"));

        store.clear().await?;
        assert!(store.members().await?.is_empty());
        Ok(())
    }
}
