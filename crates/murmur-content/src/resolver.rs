//! Content Resolution Cache.
//!
//! Resolves content identifiers to parsed [`ContentBlob`]s with a
//! bounded LRU cache and single-flight coalescing: concurrent resolves
//! of the same identifier share one underlying store fetch. Fetches run
//! in their own task, so a caller abandoning a resolve does not cancel
//! the fetch and the result still lands in the cache for other waiters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use murmur_shared::constants::{DEFAULT_CALL_TIMEOUT, DEFAULT_CONTENT_CACHE_CAPACITY};
use murmur_shared::{ContentBlob, ContentError, ContentId, Fetched, PostPayload};

use crate::cache::LruMap;
use crate::store::ContentStore;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Maximum number of cached blobs. Eviction bounds memory only;
    /// evicted entries are simply refetched.
    pub cache_capacity: usize,
    /// Timeout for a single store fetch; elapsing maps to `Unavailable`.
    pub fetch_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CONTENT_CACHE_CAPACITY,
            fetch_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

type FetchFuture = Shared<BoxFuture<'static, Result<ContentBlob, ContentError>>>;

struct Inner {
    store: Arc<dyn ContentStore>,
    fetch_timeout: Duration,
    cache: Mutex<LruMap<ContentId, ContentBlob>>,
    /// Permanent negative cache: a malformed payload stays malformed,
    /// refetching the same bytes would be futile.
    malformed: Mutex<HashMap<ContentId, ContentError>>,
    inflight: Mutex<HashMap<ContentId, FetchFuture>>,
}

/// Resolves content identifiers to parsed payloads.
#[derive(Clone)]
pub struct ContentResolver {
    inner: Arc<Inner>,
}

impl ContentResolver {
    pub fn new(store: Arc<dyn ContentStore>, config: ResolverConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                fetch_timeout: config.fetch_timeout,
                cache: Mutex::new(LruMap::new(config.cache_capacity)),
                malformed: Mutex::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Resolve an identifier to its parsed payload.
    ///
    /// `NotFound` and `Unavailable` are not cached; a later call retries
    /// the store. `Malformed` is cached permanently for the identifier.
    pub async fn resolve(&self, id: &ContentId) -> Result<Fetched<ContentBlob>, ContentError> {
        if let Some(blob) = self.inner.cache.lock().await.get(id) {
            return Ok(Fetched::cached(blob.clone()));
        }
        if let Some(err) = self.inner.malformed.lock().await.get(id) {
            return Err(err.clone());
        }

        let fetch = self.join_or_start(id).await;
        fetch.await.map(Fetched::fresh)
    }

    /// Insert a blob whose bytes the caller already holds (e.g. a post
    /// it just uploaded), so the next read needs no fetch.
    pub async fn prime(&self, blob: ContentBlob) {
        self.inner
            .cache
            .lock()
            .await
            .insert(blob.content_id.clone(), blob);
    }

    /// Join the in-flight fetch for `id`, or start one in its own task.
    async fn join_or_start(&self, id: &ContentId) -> FetchFuture {
        let mut inflight = self.inner.inflight.lock().await;
        if let Some(fetch) = inflight.get(id) {
            debug!(id = %id, "joining in-flight content fetch");
            return fetch.clone();
        }

        let inner = self.inner.clone();
        let key = id.clone();
        let task = tokio::spawn(async move { fetch_and_record(inner, key).await });
        let fetch: FetchFuture = async move {
            task.await
                .unwrap_or_else(|_| Err(ContentError::unavailable("content fetch task aborted")))
        }
        .boxed()
        .shared();
        inflight.insert(id.clone(), fetch.clone());
        fetch
    }
}

async fn fetch_and_record(inner: Arc<Inner>, id: ContentId) -> Result<ContentBlob, ContentError> {
    let result = fetch(&inner, &id).await;
    match &result {
        Ok(blob) => {
            inner.cache.lock().await.insert(id.clone(), blob.clone());
        }
        Err(err @ ContentError::Malformed { .. }) => {
            warn!(id = %id, error = %err, "content payload malformed, caching verdict");
            inner.malformed.lock().await.insert(id.clone(), err.clone());
        }
        Err(err) => {
            debug!(id = %id, error = %err, "content fetch failed");
        }
    }
    inner.inflight.lock().await.remove(&id);
    result
}

async fn fetch(inner: &Inner, id: &ContentId) -> Result<ContentBlob, ContentError> {
    let bytes = tokio::time::timeout(inner.fetch_timeout, inner.store.get(id))
        .await
        .map_err(|_| ContentError::unavailable("content fetch timed out"))??;
    let payload = PostPayload::from_bytes(&bytes).map_err(|e| ContentError::Malformed {
        id: id.0.clone(),
        reason: e.to_string(),
    })?;
    debug!(id = %id, "resolved content");
    Ok(payload.into_blob(id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryContentStore;
    use async_trait::async_trait;
    use murmur_shared::Freshness;

    /// Store wrapper that adds latency so tests can overlap requests.
    struct SlowStore {
        inner: MemoryContentStore,
        delay: Duration,
    }

    #[async_trait]
    impl ContentStore for SlowStore {
        async fn put(&self, bytes: Vec<u8>) -> Result<ContentId, ContentError> {
            self.inner.put(bytes).await
        }

        async fn get(&self, id: &ContentId) -> Result<Vec<u8>, ContentError> {
            tokio::time::sleep(self.delay).await;
            self.inner.get(id).await
        }
    }

    async fn seeded(delay: Duration) -> (Arc<SlowStore>, ContentId) {
        let store = Arc::new(SlowStore {
            inner: MemoryContentStore::new(),
            delay,
        });
        let payload = PostPayload::new("hello timeline".to_string(), None);
        let id = store.put(payload.to_bytes().unwrap()).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_resolve_parses_and_caches() {
        let (store, id) = seeded(Duration::ZERO).await;
        let resolver = ContentResolver::new(store.clone(), ResolverConfig::default());

        let first = resolver.resolve(&id).await.unwrap();
        assert_eq!(first.freshness, Freshness::Fresh);
        assert_eq!(first.value.body, "hello timeline");

        let second = resolver.resolve(&id).await.unwrap();
        assert_eq!(second.freshness, Freshness::Cached);
        assert_eq!(second.value, first.value);
        assert_eq!(store.inner.get_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_resolves_coalesce() {
        let (store, id) = seeded(Duration::from_millis(50)).await;
        let resolver = ContentResolver::new(store.clone(), ResolverConfig::default());

        let mut handles = Vec::new();
        for _ in 0..10 {
            let resolver = resolver.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move { resolver.resolve(&id).await }));
        }
        for handle in handles {
            let blob = handle.await.unwrap().unwrap();
            assert_eq!(blob.value.body, "hello timeline");
        }
        assert_eq!(store.inner.get_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_resolve_still_populates_cache() {
        let (store, id) = seeded(Duration::from_millis(50)).await;
        let resolver = ContentResolver::new(store.clone(), ResolverConfig::default());

        let abandoned = {
            let resolver = resolver.clone();
            let id = id.clone();
            tokio::spawn(async move { resolver.resolve(&id).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        abandoned.abort();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let blob = resolver.resolve(&id).await.unwrap();
        assert_eq!(blob.freshness, Freshness::Cached);
        assert_eq!(store.inner.get_calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_is_cached_permanently() {
        let store = Arc::new(MemoryContentStore::new());
        let id = store.put(b"definitely not json".to_vec()).await.unwrap();
        let resolver = ContentResolver::new(store.clone(), ResolverConfig::default());

        for _ in 0..3 {
            let err = resolver.resolve(&id).await.unwrap_err();
            assert!(matches!(err, ContentError::Malformed { .. }));
        }
        assert_eq!(store.get_calls(), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_retried() {
        let store = Arc::new(MemoryContentStore::new());
        let resolver = ContentResolver::new(store.clone(), ResolverConfig::default());
        let id = ContentId::from("missing");

        for _ in 0..2 {
            let err = resolver.resolve(&id).await.unwrap_err();
            assert!(matches!(err, ContentError::NotFound(_)));
        }
        assert_eq!(store.get_calls(), 2);
    }

    #[tokio::test]
    async fn test_evicted_entry_is_refetched() {
        let store = Arc::new(MemoryContentStore::new());
        let a = store
            .put(PostPayload::new("a".into(), None).to_bytes().unwrap())
            .await
            .unwrap();
        let b = store
            .put(PostPayload::new("b".into(), None).to_bytes().unwrap())
            .await
            .unwrap();
        let resolver = ContentResolver::new(
            store.clone(),
            ResolverConfig {
                cache_capacity: 1,
                ..ResolverConfig::default()
            },
        );

        resolver.resolve(&a).await.unwrap();
        resolver.resolve(&b).await.unwrap();
        // "a" was evicted; resolving it again must hit the store.
        let again = resolver.resolve(&a).await.unwrap();
        assert_eq!(again.freshness, Freshness::Fresh);
        assert_eq!(store.get_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_times_out_as_unavailable() {
        let (store, id) = seeded(Duration::from_secs(60)).await;
        let resolver = ContentResolver::new(
            store,
            ResolverConfig {
                fetch_timeout: Duration::from_millis(20),
                ..ResolverConfig::default()
            },
        );

        let err = resolver.resolve(&id).await.unwrap_err();
        assert!(matches!(err, ContentError::Unavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_prime_skips_fetch() {
        let store = Arc::new(MemoryContentStore::new());
        let resolver = ContentResolver::new(store.clone(), ResolverConfig::default());
        let blob = PostPayload::new("local".into(), None).into_blob(ContentId::from("c-local"));

        resolver.prime(blob.clone()).await;
        let fetched = resolver.resolve(&blob.content_id).await.unwrap();
        assert_eq!(fetched.value, blob);
        assert_eq!(store.get_calls(), 0);
    }
}
