//! TTL cache with single-flight coalescing, keyed by request identity.
//!
//! One instance per read operation kind. Insertions are keyed and
//! insert-only; the per-key in-flight future is the only
//! synchronization primitive, no cross-key locking exists.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, Shared};
use futures::{Future, FutureExt};
use tokio::sync::Mutex;
use tracing::debug;

use murmur_shared::{Fetched, LedgerError};

struct CacheEntry<V> {
    value: V,
    fetched_at: Instant,
}

struct FlightInner<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    inflight: Mutex<HashMap<K, Shared<BoxFuture<'static, Result<V, LedgerError>>>>>,
}

/// Per-operation cache. Cloning shares the underlying maps.
pub struct FlightCache<K, V> {
    inner: Arc<FlightInner<K, V>>,
}

impl<K, V> Clone for FlightCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> FlightCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FlightInner {
                entries: Mutex::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Look up `key`, fetching on miss or expiry.
    ///
    /// Concurrent calls for the same key share one fetch, which runs in
    /// its own task so caller cancellation cannot abort it. With
    /// `stale_on_error`, a failed refetch falls back to the expired
    /// entry instead of erroring (used for records whose immutable
    /// fields stay valid forever).
    pub async fn get_with<F, Fut>(
        &self,
        key: K,
        ttl: Duration,
        stale_on_error: bool,
        fetch: F,
    ) -> Result<Fetched<V>, LedgerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, LedgerError>> + Send + 'static,
    {
        if let Some(entry) = self.inner.entries.lock().await.get(&key) {
            if entry.fetched_at.elapsed() < ttl {
                return Ok(Fetched::cached(entry.value.clone()));
            }
        }

        let shared = {
            let mut inflight = self.inner.inflight.lock().await;
            if let Some(existing) = inflight.get(&key) {
                debug!(key = ?key, "joining in-flight ledger read");
                existing.clone()
            } else {
                let inner = self.inner.clone();
                let task_key = key.clone();
                let fut = fetch();
                let task = tokio::spawn(async move {
                    let result = fut.await;
                    if let Ok(value) = &result {
                        inner.entries.lock().await.insert(
                            task_key.clone(),
                            CacheEntry {
                                value: value.clone(),
                                fetched_at: Instant::now(),
                            },
                        );
                    }
                    inner.inflight.lock().await.remove(&task_key);
                    result
                });
                let shared: Shared<BoxFuture<'static, Result<V, LedgerError>>> = async move {
                    task.await
                        .unwrap_or_else(|_| Err(LedgerError::unavailable("read task aborted")))
                }
                .boxed()
                .shared();
                inflight.insert(key.clone(), shared.clone());
                shared
            }
        };

        match shared.await {
            Ok(value) => Ok(Fetched::fresh(value)),
            Err(err) if stale_on_error => {
                if let Some(entry) = self.inner.entries.lock().await.get(&key) {
                    debug!(key = ?key, error = %err, "refetch failed, serving stale entry");
                    return Ok(Fetched::cached(entry.value.clone()));
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Drop the cached entry so the next read refetches.
    pub async fn invalidate(&self, key: &K) {
        self.inner.entries.lock().await.remove(key);
    }
}
