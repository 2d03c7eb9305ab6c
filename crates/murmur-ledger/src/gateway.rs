//! Ledger Read Gateway.
//!
//! The ledger only answers point lookups, so the gateway supplies what
//! the read path actually needs on top of that: short-TTL caching for
//! mutable data, indefinite reuse of immutable post fields, per-key
//! single-flight coalescing, and bounded fan-out for batch reads where
//! one failed item never fails the batch.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::StreamExt;
use futures::{stream, Future};
use tracing::debug;

use murmur_shared::constants::{DEFAULT_CALL_TIMEOUT, DEFAULT_FANOUT, DEFAULT_READ_TTL};
use murmur_shared::{Address, Fetched, LedgerError, PostId, PostRecord, ProfileRecord};

use crate::flight::FlightCache;
use crate::ledger::Ledger;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Time-to-live for mutable reads: counters, edge lists, flags.
    pub read_ttl: Duration,
    /// Timeout applied to each individual ledger call.
    pub call_timeout: Duration,
    /// Maximum concurrent ledger calls during a batch fan-out.
    pub fanout: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            read_ttl: DEFAULT_READ_TTL,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            fanout: DEFAULT_FANOUT,
        }
    }
}

/// Caching, deduplicating front of the ledger's point-read API.
#[derive(Clone)]
pub struct ReadGateway {
    ledger: Arc<dyn Ledger>,
    config: GatewayConfig,
    posts: FlightCache<PostId, PostRecord>,
    profiles: FlightCache<Address, ProfileRecord>,
    user_posts: FlightCache<Address, Vec<PostId>>,
    replies: FlightCache<PostId, Vec<PostId>>,
    liked: FlightCache<(Address, PostId), bool>,
    followers: FlightCache<Address, Vec<Address>>,
    following: FlightCache<Address, Vec<Address>>,
    follow_edges: FlightCache<(Address, Address), bool>,
}

/// Apply the per-call timeout; elapsing degrades to `Unavailable`.
fn timed<T, F>(limit: Duration, fut: F) -> impl Future<Output = Result<T, LedgerError>> + Send
where
    T: Send,
    F: Future<Output = Result<T, LedgerError>> + Send,
{
    async move {
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| LedgerError::unavailable("ledger call timed out"))?
    }
}

impl ReadGateway {
    pub fn new(ledger: Arc<dyn Ledger>, config: GatewayConfig) -> Self {
        Self {
            ledger,
            config,
            posts: FlightCache::new(),
            profiles: FlightCache::new(),
            user_posts: FlightCache::new(),
            replies: FlightCache::new(),
            liked: FlightCache::new(),
            followers: FlightCache::new(),
            following: FlightCache::new(),
            follow_edges: FlightCache::new(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    // -- Point reads --

    /// Fetch a post record.
    ///
    /// Expired entries are refetched to refresh the counters; if the
    /// refetch fails the stale record is served instead, since
    /// everything but the counters is immutable.
    pub async fn post(&self, id: PostId) -> Result<Fetched<PostRecord>, LedgerError> {
        let ledger = self.ledger.clone();
        let limit = self.config.call_timeout;
        self.posts
            .get_with(id, self.config.read_ttl, true, move || {
                timed(limit, async move { ledger.get_post(id).await })
            })
            .await
    }

    pub async fn profile(&self, address: Address) -> Result<Fetched<ProfileRecord>, LedgerError> {
        let ledger = self.ledger.clone();
        let limit = self.config.call_timeout;
        self.profiles
            .get_with(address, self.config.read_ttl, false, move || {
                timed(limit, async move { ledger.get_profile(address).await })
            })
            .await
    }

    pub async fn user_posts(&self, address: Address) -> Result<Fetched<Vec<PostId>>, LedgerError> {
        let ledger = self.ledger.clone();
        let limit = self.config.call_timeout;
        self.user_posts
            .get_with(address, self.config.read_ttl, false, move || {
                timed(limit, async move { ledger.get_user_posts(address).await })
            })
            .await
    }

    pub async fn replies(&self, id: PostId) -> Result<Fetched<Vec<PostId>>, LedgerError> {
        let ledger = self.ledger.clone();
        let limit = self.config.call_timeout;
        self.replies
            .get_with(id, self.config.read_ttl, false, move || {
                timed(limit, async move { ledger.get_replies(id).await })
            })
            .await
    }

    pub async fn has_liked(
        &self,
        address: Address,
        id: PostId,
    ) -> Result<Fetched<bool>, LedgerError> {
        let ledger = self.ledger.clone();
        let limit = self.config.call_timeout;
        self.liked
            .get_with((address, id), self.config.read_ttl, false, move || {
                timed(limit, async move { ledger.check_liked(address, id).await })
            })
            .await
    }

    pub async fn followers(&self, address: Address) -> Result<Fetched<Vec<Address>>, LedgerError> {
        let ledger = self.ledger.clone();
        let limit = self.config.call_timeout;
        self.followers
            .get_with(address, self.config.read_ttl, false, move || {
                timed(limit, async move { ledger.get_followers(address).await })
            })
            .await
    }

    pub async fn following(&self, address: Address) -> Result<Fetched<Vec<Address>>, LedgerError> {
        let ledger = self.ledger.clone();
        let limit = self.config.call_timeout;
        self.following
            .get_with(address, self.config.read_ttl, false, move || {
                timed(limit, async move { ledger.get_following(address).await })
            })
            .await
    }

    pub async fn is_following(
        &self,
        follower: Address,
        followed: Address,
    ) -> Result<Fetched<bool>, LedgerError> {
        let ledger = self.ledger.clone();
        let limit = self.config.call_timeout;
        self.follow_edges
            .get_with(
                (follower, followed),
                self.config.read_ttl,
                false,
                move || {
                    timed(limit, async move {
                        ledger.check_following(follower, followed).await
                    })
                },
            )
            .await
    }

    /// Highest assigned post id. Never cached: it is the timeline's
    /// pagination anchor and must observe new posts.
    pub async fn latest_post_id(&self) -> Result<PostId, LedgerError> {
        let ledger = self.ledger.clone();
        timed(self.config.call_timeout, async move {
            ledger.latest_post_id().await
        })
        .await
    }

    // -- Bounded fan-out --

    /// Fetch many posts with at most `fanout` calls in flight.
    ///
    /// Results come back per item, in input order; one failure degrades
    /// that item only.
    pub async fn posts(
        &self,
        ids: &[PostId],
    ) -> Vec<(PostId, Result<Fetched<PostRecord>, LedgerError>)> {
        debug!(count = ids.len(), "fanning out post reads");
        stream::iter(ids.to_vec())
            .map(|id| async move { (id, self.post(id).await) })
            .buffered(self.config.fanout.max(1))
            .collect()
            .await
    }

    /// Fetch reply-id lists for many posts, bounded and per-item.
    pub async fn replies_many(
        &self,
        ids: &[PostId],
    ) -> Vec<(PostId, Result<Fetched<Vec<PostId>>, LedgerError>)> {
        stream::iter(ids.to_vec())
            .map(|id| async move { (id, self.replies(id).await) })
            .buffered(self.config.fanout.max(1))
            .collect()
            .await
    }

    // -- Invalidation (used after confirmed mutations) --

    pub async fn invalidate_post(&self, id: PostId) {
        self.posts.invalidate(&id).await;
    }

    pub async fn invalidate_replies(&self, id: PostId) {
        self.replies.invalidate(&id).await;
    }

    pub async fn invalidate_liked(&self, address: Address, id: PostId) {
        self.liked.invalidate(&(address, id)).await;
    }

    pub async fn invalidate_profile(&self, address: Address) {
        self.profiles.invalidate(&address).await;
    }

    pub async fn invalidate_user_posts(&self, address: Address) {
        self.user_posts.invalidate(&address).await;
    }

    pub async fn invalidate_follow_state(&self, follower: Address, followed: Address) {
        self.follow_edges.invalidate(&(follower, followed)).await;
        self.followers.invalidate(&followed).await;
        self.following.invalidate(&follower).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeLedger;
    use murmur_shared::{ContentId, NO_PARENT};

    fn addr(byte: u8) -> Address {
        Address([byte; 20])
    }

    fn gateway(ledger: Arc<FakeLedger>, config: GatewayConfig) -> ReadGateway {
        ReadGateway::new(ledger, config)
    }

    #[tokio::test]
    async fn test_post_read_is_cached_within_ttl() {
        let ledger = Arc::new(FakeLedger::new(addr(1)));
        let id = ledger.seed_post(addr(2), ContentId::from("c"), NO_PARENT).await;
        let gw = gateway(ledger.clone(), GatewayConfig::default());

        let first = gw.post(id).await.unwrap();
        assert!(!first.is_cached());
        let second = gw.post(id).await.unwrap();
        assert!(second.is_cached());
        assert_eq!(ledger.call_count("get_post").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_profile_reads_hit_ledger_once() {
        let ledger = Arc::new(
            FakeLedger::new(addr(1)).with_latency(Duration::from_millis(50)),
        );
        ledger.seed_profile(addr(2), "ada", "Ada").await;
        let gw = gateway(ledger.clone(), GatewayConfig::default());

        let mut handles = Vec::new();
        for _ in 0..10 {
            let gw = gw.clone();
            handles.push(tokio::spawn(async move { gw.profile(addr(2)).await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().value.username, "ada");
        }
        assert_eq!(ledger.call_count("get_profile").await, 1);
    }

    #[tokio::test]
    async fn test_expired_post_served_stale_when_refetch_fails() {
        let ledger = Arc::new(FakeLedger::new(addr(1)));
        let id = ledger.seed_post(addr(2), ContentId::from("c"), NO_PARENT).await;
        let gw = gateway(
            ledger.clone(),
            GatewayConfig {
                read_ttl: Duration::ZERO,
                ..GatewayConfig::default()
            },
        );

        let first = gw.post(id).await.unwrap();
        ledger.fail_post(id).await;

        let stale = gw.post(id).await.unwrap();
        assert!(stale.is_cached());
        assert_eq!(stale.value, first.value);
    }

    #[tokio::test]
    async fn test_expired_edge_list_error_propagates() {
        let ledger = Arc::new(FakeLedger::new(addr(1)));
        ledger.seed_profile(addr(2), "ada", "Ada").await;
        let gw = gateway(
            ledger.clone(),
            GatewayConfig {
                read_ttl: Duration::ZERO,
                ..GatewayConfig::default()
            },
        );

        gw.followers(addr(2)).await.unwrap();
        ledger.set_reads_failing(true).await;
        assert!(gw.followers(addr(2)).await.is_err());
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_degrades_per_item() {
        let ledger = Arc::new(FakeLedger::new(addr(1)));
        let a = ledger.seed_post(addr(2), ContentId::from("a"), NO_PARENT).await;
        let b = ledger.seed_post(addr(2), ContentId::from("b"), NO_PARENT).await;
        let c = ledger.seed_post(addr(2), ContentId::from("c"), NO_PARENT).await;
        ledger.fail_post(b).await;
        let gw = gateway(ledger.clone(), GatewayConfig::default());

        let results = gw.posts(&[c, b, a]).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, c);
        assert!(results[0].1.is_ok());
        assert_eq!(results[1].0, b);
        assert!(results[1].1.is_err());
        assert_eq!(results[2].0, a);
        assert!(results[2].1.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out_as_unavailable() {
        let ledger = Arc::new(FakeLedger::new(addr(1)).with_latency(Duration::from_secs(60)));
        let gw = gateway(
            ledger.clone(),
            GatewayConfig {
                call_timeout: Duration::from_millis(20),
                ..GatewayConfig::default()
            },
        );

        let err = gw.latest_post_id().await.unwrap_err();
        assert!(matches!(err, LedgerError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_invalidate_liked_forces_refetch() {
        let ledger = Arc::new(FakeLedger::new(addr(1)));
        let id = ledger.seed_post(addr(2), ContentId::from("c"), NO_PARENT).await;
        let gw = gateway(ledger.clone(), GatewayConfig::default());

        assert!(!gw.has_liked(addr(1), id).await.unwrap().value);
        ledger.like_post(id).await.unwrap();
        // Cached: still false until invalidated.
        assert!(!gw.has_liked(addr(1), id).await.unwrap().value);

        gw.invalidate_liked(addr(1), id).await;
        assert!(gw.has_liked(addr(1), id).await.unwrap().value);
    }
}
