use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Process-local TTL cache shared across request handlers.
///
/// Best-effort only: correctness never depends on an entry being present,
/// only on `get` never returning a value past its TTL. Expired entries are
/// dropped on read and swept opportunistically on write.
#[derive(Clone)]
pub struct TtlCache<V> {
    ttl: Duration,
    inner: Arc<RwLock<HashMap<String, Entry<V>>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            let map = self.inner.read().await;
            match map.get(key) {
                Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // stale entry seen under the read lock; drop it
        let mut map = self.inner.write().await;
        if map.get(key).is_some_and(|e| e.expires_at <= now) {
            map.remove(key);
        }
        None
    }

    pub async fn put(&self, key: String, value: V) {
        self.put_with_ttl(key, value, self.ttl).await;
    }

    /// Insert with an explicit lifetime, for entries whose expiry comes from
    /// an upstream source (bearer token `expires_in`).
    pub async fn put_with_ttl(&self, key: String, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut map = self.inner.write().await;
        map.retain(|_, e| e.expires_at > now);
        map.insert(
            key,
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    pub async fn invalidate(&self, key: &str) {
        let mut map = self.inner.write().await;
        map.remove(key);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
