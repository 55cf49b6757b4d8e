//! Key ownership lookups with a short-lived cache.
//!
//! Premium checks ask "does this user hold that key?" on many requests.
//! Answers are cached for the configured TTL; purchases and revocations
//! through the API invalidate the affected entry right away.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rotur_shared::types::fold_username;
use rotur_store::Store;
use tokio::sync::RwLock;
use tracing::debug;

// ---------------------------------------------------------------------------
// Cached entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct CachedAccess {
    has_access: bool,
    /// When we cached this result.
    checked_at: DateTime<Utc>,
}

impl CachedAccess {
    fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.checked_at < ttl
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Caches `Store::has_access` answers per (key token, folded username).
#[derive(Clone)]
pub struct KeyOwnershipCache {
    store: Store,
    ttl: Duration,
    cache: Arc<RwLock<HashMap<(String, String), CachedAccess>>>,
}

impl KeyOwnershipCache {
    pub fn new(store: Store, ttl: std::time::Duration) -> Self {
        Self {
            store,
            ttl: Duration::from_std(ttl).unwrap_or(Duration::zero()),
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Whether `user` may use `token`, served from cache when fresh.
    pub async fn has_access(&self, token: &str, user: &str) -> bool {
        let cache_key = (token.to_string(), fold_username(user));
        let now = Utc::now();

        // 1. Check the cache first.
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&cache_key) {
                if entry.is_fresh(self.ttl, now) {
                    debug!(user = %cache_key.1, "Key ownership served from cache");
                    return entry.has_access;
                }
            }
        }

        // 2. Ask the store.
        let has_access = self.store.has_access(token, &cache_key.1).await;

        // 3. Update the cache.
        self.cache.write().await.insert(
            cache_key,
            CachedAccess {
                has_access,
                checked_at: now,
            },
        );
        has_access
    }

    /// Forget the answer for one (key, user) pair.
    pub async fn invalidate(&self, token: &str, user: &str) {
        self.cache
            .write()
            .await
            .remove(&(token.to_string(), fold_username(user)));
    }

    /// Forget every answer about `token`.
    pub async fn invalidate_key(&self, token: &str) {
        self.cache.write().await.retain(|(t, _), _| t != token);
    }

    /// Evict expired entries from the cache.
    pub async fn purge_expired(&self) {
        let now = Utc::now();
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.is_fresh(self.ttl, now));
        let removed = before - cache.len();
        if removed > 0 {
            debug!(removed, "Purged expired key ownership entries");
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.cache.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rotur_shared::types::now_millis;
    use rotur_store::StorePaths;
    use tempfile::TempDir;

    const PW: &str = "00112233445566778899aabbccddeeff";

    async fn setup() -> (Store, String, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&StorePaths::in_dir(dir.path())).await;
        store.register("alice", "a@x.io", PW, None).await.unwrap();
        store.register("bob", "b@x.io", PW, None).await.unwrap();
        let key = store.create_key("alice", "Premium", 0, None).await.unwrap();
        (store, key.key, dir)
    }

    #[tokio::test]
    async fn test_cached_answer_until_invalidated() {
        let (store, token, _dir) = setup().await;
        let cache = KeyOwnershipCache::new(store.clone(), std::time::Duration::from_secs(60));

        assert!(!cache.has_access(&token, "bob").await);
        store.buy_key(&token, "bob", now_millis()).await.unwrap();
        // Still the cached answer.
        assert!(!cache.has_access(&token, "BOB").await);

        cache.invalidate(&token, "bob").await;
        assert!(cache.has_access(&token, "bob").await);
        assert!(cache.has_access(&token, "alice").await);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_asks_store() {
        let (store, token, _dir) = setup().await;
        let cache = KeyOwnershipCache::new(store.clone(), std::time::Duration::ZERO);

        assert!(!cache.has_access(&token, "bob").await);
        store.admin_grant_key(&token, "bob").await.unwrap();
        assert!(cache.has_access(&token, "bob").await);

        cache.purge_expired().await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_invalidate_key() {
        let (store, token, _dir) = setup().await;
        let cache = KeyOwnershipCache::new(store, std::time::Duration::from_secs(60));
        cache.has_access(&token, "alice").await;
        cache.has_access(&token, "bob").await;

        cache.invalidate_key(&token).await;
        assert_eq!(cache.len().await, 0);
    }
}
