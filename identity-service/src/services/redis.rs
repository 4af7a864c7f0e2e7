use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, Client};
use secrecy::ExposeSecret;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Key-value state with per-key TTLs: refresh token records, their per-user
/// index sets, and invitations.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn health_check(&self) -> Result<(), anyhow::Error>;

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error>;

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;

    /// Atomic read-and-delete. Of several concurrent callers at most one
    /// observes the value.
    async fn take(&self, key: &str) -> Result<Option<String>, anyhow::Error>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error>;

    /// Atomically increment the integer at `key` (absent counts as 0) and
    /// return the new value. The key does not expire.
    async fn incr(&self, key: &str) -> Result<i64, anyhow::Error>;

    /// Add `member` to the set at `key` and reset the set's TTL.
    async fn add_to_set(&self, key: &str, member: &str, ttl_seconds: u64)
        -> Result<(), anyhow::Error>;

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), anyhow::Error>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.expose_secret().as_str())?;

        // ConnectionManager reconnects transparently.
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self { manager })
    }
}

#[async_trait]
impl EphemeralStore for RedisStore {
    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set key: {}", e))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get key: {}", e))
    }

    async fn take(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to take key: {}", e))
    }

    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete key: {}", e))?;
        Ok(removed > 0)
    }

    async fn incr(&self, key: &str) -> Result<i64, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to increment key: {}", e))
    }

    async fn add_to_set(
        &self,
        key: &str,
        member: &str,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::pipe()
            .atomic()
            .cmd("SADD")
            .arg(key)
            .arg(member)
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds.max(1))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to add set member: {}", e))
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to remove set member: {}", e))
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read set: {}", e))
    }
}

/// In-memory store with TTL semantics, for tests and local runs.
#[derive(Default)]
pub struct MockEphemeralStore {
    values: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
    sets: Mutex<HashMap<String, (HashSet<String>, DateTime<Utc>)>>,
}

impl MockEphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn expiry(ttl_seconds: u64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(ttl_seconds as i64)
    }

    /// Force a key to expire now.
    pub fn expire(&self, key: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.remove(key);
        }
        if let Ok(mut sets) = self.sets.lock() {
            sets.remove(key);
        }
    }

    /// Number of live keys whose name starts with `prefix`.
    pub fn count_prefix(&self, prefix: &str) -> usize {
        let now = Utc::now();
        self.values
            .lock()
            .map(|values| {
                values
                    .iter()
                    .filter(|(k, (_, exp))| k.starts_with(prefix) && *exp > now)
                    .count()
            })
            .unwrap_or(0)
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> anyhow::Error {
    anyhow::anyhow!("Mock store mutex poisoned: {}", e)
}

#[async_trait]
impl EphemeralStore for MockEphemeralStore {
    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        self.values
            .lock()
            .map_err(poisoned)?
            .insert(key.to_string(), (value.to_string(), Self::expiry(ttl_seconds)));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let values = self.values.lock().map_err(poisoned)?;
        Ok(values
            .get(key)
            .filter(|(_, exp)| *exp > Utc::now())
            .map(|(v, _)| v.clone()))
    }

    async fn take(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut values = self.values.lock().map_err(poisoned)?;
        Ok(values
            .remove(key)
            .filter(|(_, exp)| *exp > Utc::now())
            .map(|(v, _)| v))
    }

    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error> {
        let removed_value = self.values.lock().map_err(poisoned)?.remove(key).is_some();
        let removed_set = self.sets.lock().map_err(poisoned)?.remove(key).is_some();
        Ok(removed_value || removed_set)
    }

    async fn incr(&self, key: &str) -> Result<i64, anyhow::Error> {
        let mut values = self.values.lock().map_err(poisoned)?;
        let now = Utc::now();
        let current = values
            .get(key)
            .filter(|(_, exp)| *exp > now)
            .map(|(v, _)| v.parse::<i64>())
            .transpose()
            .map_err(|e| anyhow::anyhow!("Value is not an integer: {}", e))?
            .unwrap_or(0);
        let next = current + 1;
        values.insert(key.to_string(), (next.to_string(), DateTime::<Utc>::MAX_UTC));
        Ok(next)
    }

    async fn add_to_set(
        &self,
        key: &str,
        member: &str,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        let mut sets = self.sets.lock().map_err(poisoned)?;
        let entry = sets
            .entry(key.to_string())
            .or_insert_with(|| (HashSet::new(), Self::expiry(ttl_seconds)));
        entry.0.insert(member.to_string());
        entry.1 = Self::expiry(ttl_seconds);
        Ok(())
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), anyhow::Error> {
        if let Some((members, _)) = self.sets.lock().map_err(poisoned)?.get_mut(key) {
            members.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, anyhow::Error> {
        let sets = self.sets.lock().map_err(poisoned)?;
        Ok(sets
            .get(key)
            .filter(|(_, exp)| *exp > Utc::now())
            .map(|(members, _)| members.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn take_is_single_use() {
        let store = MockEphemeralStore::new();
        store.set_ex("k", "v", 60).await.unwrap();
        assert_eq!(store.take("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.take("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn zero_ttl_is_already_expired() {
        let store = MockEphemeralStore::new();
        store.set_ex("k", "v", 0).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_counts_from_zero() {
        let store = MockEphemeralStore::new();
        assert_eq!(store.incr("n").await.unwrap(), 1);
        assert_eq!(store.incr("n").await.unwrap(), 2);
        assert_eq!(store.get("n").await.unwrap().as_deref(), Some("2"));

        store.set_ex("text", "abc", 60).await.unwrap();
        assert!(store.incr("text").await.is_err());
    }

    #[tokio::test]
    async fn sets_track_members() {
        let store = MockEphemeralStore::new();
        store.add_to_set("s", "a", 60).await.unwrap();
        store.add_to_set("s", "b", 60).await.unwrap();
        store.remove_from_set("s", "a").await.unwrap();
        assert_eq!(store.set_members("s").await.unwrap(), vec!["b".to_string()]);
        assert!(store.delete("s").await.unwrap());
        assert!(store.set_members("s").await.unwrap().is_empty());
    }
}
