//! Response cache interface and the in-memory implementation.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::response::AiResponse;

pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Cache consumed by the orchestrator. Implementations may live out of process.
pub trait ResponseCache: Send + Sync {
    fn get<'a>(&'a self, namespace: &'a str, key: &'a str) -> CacheFuture<'a, Option<AiResponse>>;

    fn set<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
        value: AiResponse,
        ttl: Duration,
        tags: Vec<String>,
    ) -> CacheFuture<'a, ()>;

    /// Removes every entry carrying `tag` and returns how many were removed.
    fn delete_by_tag<'a>(&'a self, tag: &'a str) -> CacheFuture<'a, usize>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: AiResponse,
    expires_at: Instant,
    tags: BTreeSet<String>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

enum Lookup {
    Hit(AiResponse),
    Expired,
    Miss,
}

#[derive(Debug, Default)]
struct CacheInner {
    map: HashMap<String, CacheEntry>,
    /// Lower bound on the earliest expiry in `map`; a write past it sweeps.
    next_expiry: Option<Instant>,
}

impl CacheInner {
    fn lookup(&self, key: &str, now: Instant) -> Lookup {
        match self.map.get(key) {
            Some(entry) if entry.is_expired(now) => Lookup::Expired,
            Some(entry) => Lookup::Hit(entry.value.clone()),
            None => Lookup::Miss,
        }
    }

    fn evict_if_expired(&mut self, key: &str, now: Instant) {
        if self.map.get(key).is_some_and(|entry| entry.is_expired(now)) {
            self.map.remove(key);
        }
    }

    fn put(&mut self, key: String, value: AiResponse, ttl: Duration, tags: Vec<String>) {
        let now = Instant::now();
        if self.next_expiry.is_some_and(|next| now > next) {
            self.clear_expired_at(now);
        }

        let expires_at = now + ttl;
        self.next_expiry = Some(self.next_expiry.map_or(expires_at, |next| next.min(expires_at)));
        self.map.insert(
            key,
            CacheEntry {
                value,
                expires_at,
                tags: tags.into_iter().collect(),
            },
        );
    }

    fn delete_by_tag(&mut self, tag: &str) -> usize {
        let before = self.map.len();
        self.map.retain(|_, entry| !entry.tags.contains(tag));
        before - self.map.len()
    }

    fn clear_expired_at(&mut self, now: Instant) {
        self.map.retain(|_, entry| !entry.is_expired(now));
        self.next_expiry = self.map.values().map(|entry| entry.expires_at).min();
    }
}

/// Thread-safe in-process cache with per-entry TTL and tags.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    inner: Arc<tokio::sync::RwLock<CacheInner>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn clear_expired(&self) {
        self.inner.write().await.clear_expired_at(Instant::now());
    }

    /// Entry count. Expired entries are evicted when read and swept on the
    /// first write after the earliest one lapses, so a few may still count.
    pub async fn len(&self) -> usize {
        self.inner.read().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn scoped_key(namespace: &str, key: &str) -> String {
    format!("{namespace}:{key}")
}

impl ResponseCache for MemoryCache {
    fn get<'a>(&'a self, namespace: &'a str, key: &'a str) -> CacheFuture<'a, Option<AiResponse>> {
        Box::pin(async move {
            let key = scoped_key(namespace, key);
            let now = Instant::now();
            let lookup = self.inner.read().await.lookup(&key, now);
            match lookup {
                Lookup::Hit(value) => Some(value),
                Lookup::Expired => {
                    self.inner.write().await.evict_if_expired(&key, now);
                    None
                }
                Lookup::Miss => None,
            }
        })
    }

    fn set<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
        value: AiResponse,
        ttl: Duration,
        tags: Vec<String>,
    ) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            if ttl.is_zero() {
                return;
            }
            self.inner
                .write()
                .await
                .put(scoped_key(namespace, key), value, ttl, tags);
        })
    }

    fn delete_by_tag<'a>(&'a self, tag: &'a str) -> CacheFuture<'a, usize> {
        Box::pin(async move { self.inner.write().await.delete_by_tag(tag) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityType;
    use crate::normalize::{CanonicalResult, ScoringResult};
    use crate::response::ResponseMetadata;
    use time::OffsetDateTime;

    fn response(id: &str) -> AiResponse {
        AiResponse {
            id: id.to_owned(),
            capability: CapabilityType::Scoring,
            result: CanonicalResult::Scoring(ScoringResult::default()),
            metadata: ResponseMetadata {
                provider_used: String::from("mock"),
                model: None,
                processing_time_ms: 1,
                confidence: 0.85,
                served_from_cache: false,
                heuristic: false,
                fallback_used: false,
                timestamp: OffsetDateTime::UNIX_EPOCH,
                cost: None,
            },
        }
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let cache = MemoryCache::new();
        cache
            .set("ai", "k", response("a"), Duration::from_secs(60), Vec::new())
            .await;

        assert!(cache.get("ai", "k").await.is_some());
        assert!(cache.get("other", "k").await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let cache = MemoryCache::new();
        cache
            .set("ai", "k", response("a"), Duration::from_millis(5), Vec::new())
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(cache.get("ai", "k").await.is_none());
        cache.clear_expired().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn reading_an_expired_entry_evicts_it() {
        let cache = MemoryCache::new();
        cache
            .set("ai", "k", response("a"), Duration::from_millis(1), Vec::new())
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(cache.get("ai", "k").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn writes_sweep_expired_entries_from_distinct_keys() {
        let cache = MemoryCache::new();
        for index in 0..500 {
            let key = format!("stale-{index}");
            cache
                .set("ai", &key, response("s"), Duration::from_millis(1), Vec::new())
                .await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        for index in 0..10 {
            let key = format!("fresh-{index}");
            cache
                .set("ai", &key, response("f"), Duration::from_secs(60), Vec::new())
                .await;
            assert!(cache.get("ai", &key).await.is_some());
        }

        assert_eq!(cache.len().await, 10);
    }

    #[tokio::test]
    async fn delete_by_tag_removes_only_tagged_entries() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache
            .set("ai", "a", response("a"), ttl, vec![String::from("subject:abc")])
            .await;
        cache
            .set("ai", "b", response("b"), ttl, vec![String::from("subject:xyz")])
            .await;

        assert_eq!(cache.delete_by_tag("subject:abc").await, 1);
        assert!(cache.get("ai", "a").await.is_none());
        assert!(cache.get("ai", "b").await.is_some());
    }
}
