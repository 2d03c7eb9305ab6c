//! In-memory ledger double for tests and local development.
//!
//! Not cfg(test)-gated: downstream crates drive their own tests with
//! it. Tracks per-method call counts so tests can assert that caching
//! and single-flight actually suppressed ledger traffic, and supports
//! latency and failure injection.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use murmur_shared::{
    Address, ContentId, LedgerError, PostId, PostRecord, ProfileRecord, TxError, NO_PARENT,
};

use crate::ledger::{Ledger, NewProfile, ProfileUpdate};

#[derive(Default)]
struct State {
    posts: BTreeMap<PostId, PostRecord>,
    profiles: HashMap<Address, ProfileRecord>,
    likes: HashSet<(Address, PostId)>,
    /// (follower, followed), insertion-ordered for deterministic lists.
    follows: Vec<(Address, Address)>,
    next_id: PostId,
}

pub struct FakeLedger {
    /// The account mutating calls act as.
    caller: Address,
    latency: Duration,
    state: Mutex<State>,
    calls: Mutex<HashMap<&'static str, usize>>,
    fail_posts: Mutex<HashSet<PostId>>,
    all_reads_fail: Mutex<bool>,
    next_tx_error: Mutex<Option<TxError>>,
}

impl FakeLedger {
    pub fn new(caller: Address) -> Self {
        Self {
            caller,
            latency: Duration::ZERO,
            state: Mutex::new(State {
                next_id: 1,
                ..State::default()
            }),
            calls: Mutex::new(HashMap::new()),
            fail_posts: Mutex::new(HashSet::new()),
            all_reads_fail: Mutex::new(false),
            next_tx_error: Mutex::new(None),
        }
    }

    /// Add artificial latency to every call so tests can overlap
    /// requests deterministically (with a paused tokio clock).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn caller(&self) -> Address {
        self.caller
    }

    // -- Seeding --

    pub async fn seed_post(
        &self,
        author: Address,
        content_id: ContentId,
        reply_to: PostId,
    ) -> PostId {
        let mut state = self.state.lock().await;
        let id = state.next_id;
        state.next_id += 1;
        if reply_to != NO_PARENT {
            if let Some(parent) = state.posts.get_mut(&reply_to) {
                parent.reply_count += 1;
            }
        }
        state.posts.insert(
            id,
            PostRecord {
                id,
                author,
                content_id,
                timestamp: 1_700_000_000 + id,
                reply_to,
                like_count: 0,
                reply_count: 0,
            },
        );
        id
    }

    pub async fn seed_profile(&self, address: Address, username: &str, display_name: &str) {
        self.state.lock().await.profiles.insert(
            address,
            ProfileRecord {
                address,
                username: username.to_string(),
                display_name: display_name.to_string(),
                avatar_id: None,
                banner_id: None,
                join_date: 1_700_000_000,
            },
        );
    }

    /// Rewire a stored post's parent pointer. Lets tests fabricate the
    /// data anomalies (cycles, dangling parents) the ledger never
    /// prevents.
    pub async fn set_reply_to(&self, id: PostId, reply_to: PostId) {
        if let Some(post) = self.state.lock().await.posts.get_mut(&id) {
            post.reply_to = reply_to;
        }
    }

    // -- Failure injection --

    /// Make reads of a specific post fail with `Unavailable`.
    pub async fn fail_post(&self, id: PostId) {
        self.fail_posts.lock().await.insert(id);
    }

    pub async fn restore_post(&self, id: PostId) {
        self.fail_posts.lock().await.remove(&id);
    }

    /// Make every read fail with `Unavailable` until restored.
    pub async fn set_reads_failing(&self, failing: bool) {
        *self.all_reads_fail.lock().await = failing;
    }

    /// Make the next mutating call fail with the given error.
    pub async fn reject_next_tx(&self, error: TxError) {
        *self.next_tx_error.lock().await = Some(error);
    }

    // -- Introspection --

    /// Number of calls recorded for a trait method name.
    pub async fn call_count(&self, method: &str) -> usize {
        self.calls.lock().await.get(method).copied().unwrap_or(0)
    }

    async fn begin_read(&self, method: &'static str) -> Result<(), LedgerError> {
        *self.calls.lock().await.entry(method).or_insert(0) += 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if *self.all_reads_fail.lock().await {
            return Err(LedgerError::unavailable("fake ledger offline"));
        }
        Ok(())
    }

    async fn begin_tx(&self, method: &'static str) -> Result<(), TxError> {
        *self.calls.lock().await.entry(method).or_insert(0) += 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(error) = self.next_tx_error.lock().await.take() {
            return Err(error);
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn get_post(&self, id: PostId) -> Result<PostRecord, LedgerError> {
        self.begin_read("get_post").await?;
        if self.fail_posts.lock().await.contains(&id) {
            return Err(LedgerError::unavailable(format!("post {id} unreachable")));
        }
        self.state
            .lock()
            .await
            .posts
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("post {id}")))
    }

    async fn get_profile(&self, address: Address) -> Result<ProfileRecord, LedgerError> {
        self.begin_read("get_profile").await?;
        self.state
            .lock()
            .await
            .profiles
            .get(&address)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("profile {address}")))
    }

    async fn get_user_posts(&self, address: Address) -> Result<Vec<PostId>, LedgerError> {
        self.begin_read("get_user_posts").await?;
        Ok(self
            .state
            .lock()
            .await
            .posts
            .values()
            .filter(|p| p.author == address)
            .map(|p| p.id)
            .collect())
    }

    async fn get_replies(&self, id: PostId) -> Result<Vec<PostId>, LedgerError> {
        self.begin_read("get_replies").await?;
        Ok(self
            .state
            .lock()
            .await
            .posts
            .values()
            .filter(|p| p.reply_to == id)
            .map(|p| p.id)
            .collect())
    }

    async fn check_liked(&self, address: Address, id: PostId) -> Result<bool, LedgerError> {
        self.begin_read("check_liked").await?;
        Ok(self.state.lock().await.likes.contains(&(address, id)))
    }

    async fn get_followers(&self, address: Address) -> Result<Vec<Address>, LedgerError> {
        self.begin_read("get_followers").await?;
        Ok(self
            .state
            .lock()
            .await
            .follows
            .iter()
            .filter(|(_, followed)| *followed == address)
            .map(|(follower, _)| *follower)
            .collect())
    }

    async fn get_following(&self, address: Address) -> Result<Vec<Address>, LedgerError> {
        self.begin_read("get_following").await?;
        Ok(self
            .state
            .lock()
            .await
            .follows
            .iter()
            .filter(|(follower, _)| *follower == address)
            .map(|(_, followed)| *followed)
            .collect())
    }

    async fn check_following(
        &self,
        follower: Address,
        followed: Address,
    ) -> Result<bool, LedgerError> {
        self.begin_read("check_following").await?;
        Ok(self
            .state
            .lock()
            .await
            .follows
            .contains(&(follower, followed)))
    }

    async fn latest_post_id(&self) -> Result<PostId, LedgerError> {
        self.begin_read("latest_post_id").await?;
        Ok(self.state.lock().await.next_id.saturating_sub(1))
    }

    async fn create_profile(&self, profile: NewProfile) -> Result<(), TxError> {
        self.begin_tx("create_profile").await?;
        let mut state = self.state.lock().await;
        if state
            .profiles
            .get(&self.caller)
            .is_some_and(|p| p.is_registered())
        {
            return Err(TxError::rejected("profile already exists"));
        }
        state.profiles.insert(
            self.caller,
            ProfileRecord {
                address: self.caller,
                username: profile.username,
                display_name: profile.display_name,
                avatar_id: profile.avatar_id,
                banner_id: profile.banner_id,
                join_date: 1_700_000_000,
            },
        );
        Ok(())
    }

    async fn update_profile(&self, update: ProfileUpdate) -> Result<(), TxError> {
        self.begin_tx("update_profile").await?;
        let mut state = self.state.lock().await;
        let profile = state
            .profiles
            .get_mut(&self.caller)
            .ok_or_else(|| TxError::rejected("no profile to update"))?;
        profile.display_name = update.display_name;
        profile.avatar_id = update.avatar_id;
        profile.banner_id = update.banner_id;
        Ok(())
    }

    async fn create_post(
        &self,
        content_id: ContentId,
        _has_image: bool,
        reply_to: PostId,
    ) -> Result<PostId, TxError> {
        self.begin_tx("create_post").await?;
        let mut state = self.state.lock().await;
        if reply_to != NO_PARENT && !state.posts.contains_key(&reply_to) {
            return Err(TxError::rejected(format!("reply target {reply_to} missing")));
        }
        let id = state.next_id;
        state.next_id += 1;
        if reply_to != NO_PARENT {
            if let Some(parent) = state.posts.get_mut(&reply_to) {
                parent.reply_count += 1;
            }
        }
        state.posts.insert(
            id,
            PostRecord {
                id,
                author: self.caller,
                content_id,
                timestamp: 1_700_000_000 + id,
                reply_to,
                like_count: 0,
                reply_count: 0,
            },
        );
        Ok(id)
    }

    async fn like_post(&self, id: PostId) -> Result<(), TxError> {
        self.begin_tx("like_post").await?;
        let mut state = self.state.lock().await;
        if !state.posts.contains_key(&id) {
            return Err(TxError::rejected(format!("post {id} does not exist")));
        }
        if state.likes.insert((self.caller, id)) {
            if let Some(post) = state.posts.get_mut(&id) {
                post.like_count += 1;
            }
        }
        Ok(())
    }

    async fn unlike_post(&self, id: PostId) -> Result<(), TxError> {
        self.begin_tx("unlike_post").await?;
        let mut state = self.state.lock().await;
        if state.likes.remove(&(self.caller, id)) {
            if let Some(post) = state.posts.get_mut(&id) {
                post.like_count = post.like_count.saturating_sub(1);
            }
        }
        Ok(())
    }

    async fn follow_user(&self, address: Address) -> Result<(), TxError> {
        self.begin_tx("follow_user").await?;
        let mut state = self.state.lock().await;
        if !state.follows.contains(&(self.caller, address)) {
            state.follows.push((self.caller, address));
        }
        Ok(())
    }

    async fn unfollow_user(&self, address: Address) -> Result<(), TxError> {
        self.begin_tx("unfollow_user").await?;
        self.state
            .lock()
            .await
            .follows
            .retain(|edge| *edge != (self.caller, address));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address([byte; 20])
    }

    #[tokio::test]
    async fn test_seed_and_read_back() {
        let ledger = FakeLedger::new(addr(1));
        let root = ledger.seed_post(addr(2), ContentId::from("c1"), NO_PARENT).await;
        let reply = ledger.seed_post(addr(3), ContentId::from("c2"), root).await;

        let parent = ledger.get_post(root).await.unwrap();
        assert_eq!(parent.reply_count, 1);
        assert_eq!(ledger.get_replies(root).await.unwrap(), vec![reply]);
        assert_eq!(ledger.latest_post_id().await.unwrap(), reply);
        assert_eq!(ledger.call_count("get_post").await, 1);
    }

    #[tokio::test]
    async fn test_like_updates_counter_and_flag() {
        let ledger = FakeLedger::new(addr(1));
        let id = ledger.seed_post(addr(2), ContentId::from("c"), NO_PARENT).await;

        ledger.like_post(id).await.unwrap();
        // Liking twice is idempotent in the fake.
        ledger.like_post(id).await.unwrap();
        assert!(ledger.check_liked(addr(1), id).await.unwrap());
        assert_eq!(ledger.get_post(id).await.unwrap().like_count, 1);

        ledger.unlike_post(id).await.unwrap();
        assert!(!ledger.check_liked(addr(1), id).await.unwrap());
        assert_eq!(ledger.get_post(id).await.unwrap().like_count, 0);
    }

    #[tokio::test]
    async fn test_follow_edges() {
        let ledger = FakeLedger::new(addr(1));
        ledger.follow_user(addr(2)).await.unwrap();
        ledger.follow_user(addr(3)).await.unwrap();

        assert_eq!(ledger.get_following(addr(1)).await.unwrap(), vec![addr(2), addr(3)]);
        assert_eq!(ledger.get_followers(addr(2)).await.unwrap(), vec![addr(1)]);
        assert!(ledger.check_following(addr(1), addr(2)).await.unwrap());

        ledger.unfollow_user(addr(2)).await.unwrap();
        assert!(!ledger.check_following(addr(1), addr(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_tx_rejection_injection() {
        let ledger = FakeLedger::new(addr(1));
        let id = ledger.seed_post(addr(2), ContentId::from("c"), NO_PARENT).await;

        ledger.reject_next_tx(TxError::rejected("user declined")).await;
        let err = ledger.like_post(id).await.unwrap_err();
        assert!(!err.retryable);

        // The injected error is consumed; the next call succeeds.
        ledger.like_post(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_profile_rejected() {
        let ledger = FakeLedger::new(addr(1));
        let profile = NewProfile {
            username: "ada".into(),
            display_name: "Ada".into(),
            avatar_id: None,
            banner_id: None,
        };
        ledger.create_profile(profile.clone()).await.unwrap();
        assert!(ledger.create_profile(profile).await.is_err());
    }
}
