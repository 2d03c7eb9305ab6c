//! The client facade: one handle tying the gateway, resolver, overlay,
//! thread assembler, paginator and mutation coordinator together.
//!
//! Read methods return fully assembled views with the optimistic
//! overlay merged in; write methods go through the coordinator. Counter
//! overlays are applied only to cached records: an overlay entry is
//! recorded after its transaction settled, so a fresh ledger read
//! already reflects the effect and applying it again would double
//! count.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::debug;

use murmur_content::{ContentResolver, ContentStore};
use murmur_ledger::{Ledger, ReadGateway};
use murmur_shared::{
    Address, ClientError, ContentBlob, ContentId, Fetched, Freshness, LedgerError, PostId,
    ProfileRecord,
};

use crate::config::ClientConfig;
use crate::mutation::{MutationCoordinator, MutationKey, MutationStatus, ProfileDraft};
use crate::overlay::OverlaySet;
use crate::thread::ThreadAssembler;
use crate::timeline::TimelinePaginator;
use crate::view::{ChainLink, PostView, ProfileOverview, ThreadNode, ThreadView, TimelinePage};

/// Read/write reconciliation layer over a ledger and a content store,
/// bound to one viewer identity. Cheap to clone; clones share all
/// caches and the overlay.
#[derive(Clone)]
pub struct MurmurClient {
    viewer: Address,
    gateway: ReadGateway,
    resolver: ContentResolver,
    overlay: Arc<OverlaySet>,
    assembler: Arc<ThreadAssembler>,
    paginator: Arc<TimelinePaginator>,
    coordinator: Arc<MutationCoordinator>,
}

impl MurmurClient {
    pub fn new(
        viewer: Address,
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn ContentStore>,
        config: ClientConfig,
    ) -> Self {
        let gateway = ReadGateway::new(ledger.clone(), config.gateway);
        let resolver = ContentResolver::new(store.clone(), config.resolver);
        let overlay = Arc::new(OverlaySet::new(config.overlay_timeout));
        let assembler = Arc::new(ThreadAssembler::new(gateway.clone(), config.max_thread_depth));
        let paginator = Arc::new(TimelinePaginator::new(gateway.clone()));
        let coordinator = Arc::new(MutationCoordinator::new(
            viewer,
            ledger,
            store,
            resolver.clone(),
            gateway.clone(),
            overlay.clone(),
        ));
        Self {
            viewer,
            gateway,
            resolver,
            overlay,
            assembler,
            paginator,
            coordinator,
        }
    }

    pub fn viewer(&self) -> Address {
        self.viewer
    }

    // -- Reads --

    /// One page of the global timeline: root posts, newest first, with
    /// content and viewer like state attached.
    pub async fn timeline_page(
        &self,
        cursor: Option<PostId>,
        page_size: usize,
    ) -> Result<TimelinePage, ClientError> {
        let page = self.paginator.page(cursor, page_size).await?;
        let mut items: Vec<PostView> = page.records.into_iter().map(PostView::bare).collect();
        self.enrich(items.iter_mut().collect()).await;
        Ok(TimelinePage {
            items,
            next_cursor: page.next_cursor,
        })
    }

    /// A single post, fully assembled.
    pub async fn post(&self, id: PostId) -> Result<PostView, ClientError> {
        let record = self.gateway.post(id).await?;
        let mut view = PostView::bare(record);
        self.enrich(vec![&mut view]).await;
        Ok(view)
    }

    /// The thread around `post_id`: ancestors up to the root, and the
    /// reply subtree below it.
    ///
    /// Fails only if the requested post itself is unreachable; missing
    /// relatives degrade to unavailable links and leaves.
    pub async fn thread(&self, post_id: PostId) -> Result<ThreadView, ClientError> {
        let mut ancestors = self.assembler.ancestor_chain(post_id).await?;
        let mut root = self
            .assembler
            .reply_subtree(post_id, self.assembler.max_depth())
            .await;

        // A reply list containing the overlay's reply id proves the
        // ledger already indexed it, cached or not.
        if let Ok(replies) = self.gateway.replies(post_id).await {
            self.overlay.confirm_replies(post_id, &replies.value);
        }

        let mut views = Vec::new();
        for link in &mut ancestors {
            if let ChainLink::Post(view) = link {
                views.push(view);
            }
        }
        collect_views(&mut root, &mut views);
        self.enrich(views).await;

        Ok(ThreadView { ancestors, root })
    }

    /// The profile record for `address`, with any pending profile
    /// overlay taking precedence over the ledger copy.
    pub async fn profile(&self, address: Address) -> Result<Fetched<ProfileRecord>, ClientError> {
        match self.gateway.profile(address).await {
            Ok(fetched) => {
                if !fetched.is_cached() {
                    self.overlay.confirm_profile(&fetched.value);
                }
                match self.overlay.profile_for(address) {
                    Some(pending) => Ok(Fetched::fresh(pending)),
                    None => Ok(fetched),
                }
            }
            // A just-created profile can be pending while the ledger
            // still reports no registration.
            Err(LedgerError::NotFound(key)) => match self.overlay.profile_for(address) {
                Some(pending) => Ok(Fetched::fresh(pending)),
                None => Err(LedgerError::NotFound(key).into()),
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Profile page data: profile, social edge lists, authored post
    /// ids, and whether the viewer follows this address.
    pub async fn profile_overview(
        &self,
        address: Address,
    ) -> Result<ProfileOverview, ClientError> {
        let profile = self.profile(address).await?;

        let mut followers = self.gateway.followers(address).await?.value;
        self.overlay.apply_to_followers(address, &mut followers);
        let mut following = self.gateway.following(address).await?.value;
        self.overlay.apply_to_following(address, &mut following);
        let post_ids = self.gateway.user_posts(address).await?.value;
        let viewer_is_following = if address == self.viewer {
            false
        } else {
            self.is_following(address).await?
        };

        Ok(ProfileOverview {
            profile,
            followers,
            following,
            post_ids,
            viewer_is_following,
        })
    }

    /// Whether the viewer has liked `post_id`, overlay merged.
    pub async fn has_liked(&self, post_id: PostId) -> Result<bool, ClientError> {
        let ledger = self.gateway.has_liked(self.viewer, post_id).await;
        if let Ok(fetched) = &ledger {
            if !fetched.is_cached() {
                self.overlay.confirm_like(self.viewer, post_id, fetched.value);
            }
        }
        match self.overlay.like_state(self.viewer, post_id) {
            Some(liked) => Ok(liked),
            None => Ok(ledger?.value),
        }
    }

    /// Whether the viewer follows `address`, overlay merged.
    pub async fn is_following(&self, address: Address) -> Result<bool, ClientError> {
        let ledger = self.gateway.is_following(self.viewer, address).await;
        if let Ok(fetched) = &ledger {
            if !fetched.is_cached() {
                self.overlay
                    .confirm_follow(self.viewer, address, fetched.value);
            }
        }
        match self.overlay.follow_state(self.viewer, address) {
            Some(following) => Ok(following),
            None => Ok(ledger?.value),
        }
    }

    // -- Writes --

    /// Publish a root post; returns its assigned id.
    pub async fn submit_post(
        &self,
        body: &str,
        image: Option<Vec<u8>>,
    ) -> Result<PostId, ClientError> {
        Ok(self.coordinator.submit_post(body, image).await?)
    }

    /// Publish a reply to `parent`; returns its assigned id.
    pub async fn submit_reply(
        &self,
        parent: PostId,
        body: &str,
        image: Option<Vec<u8>>,
    ) -> Result<PostId, ClientError> {
        Ok(self.coordinator.submit_reply(parent, body, image).await?)
    }

    /// Flip the viewer's like on a post; returns the new state.
    pub async fn toggle_like(&self, post_id: PostId) -> Result<bool, ClientError> {
        let target = !self.has_liked(post_id).await?;
        self.coordinator.set_like(post_id, target).await?;
        Ok(target)
    }

    /// Flip the viewer's follow of an address; returns the new state.
    pub async fn toggle_follow(&self, address: Address) -> Result<bool, ClientError> {
        let target = !self.is_following(address).await?;
        self.coordinator.set_follow(address, target).await?;
        Ok(target)
    }

    /// Create or update the viewer's profile.
    pub async fn submit_profile(&self, draft: ProfileDraft) -> Result<(), ClientError> {
        Ok(self.coordinator.submit_profile(draft).await?)
    }

    /// Stage of an in-flight mutation, if one holds the slot.
    pub fn mutation_status(&self, key: &MutationKey) -> Option<MutationStatus> {
        self.coordinator.status(key)
    }

    // -- Assembly --

    /// Attach content and viewer like state to bare views, then merge
    /// counter overlays into the records that are still cached.
    async fn enrich(&self, views: Vec<&mut PostView>) {
        let ids: Vec<PostId> = views.iter().map(|v| v.record.id).collect();
        let content_ids: Vec<ContentId> = {
            let mut seen = HashSet::new();
            views
                .iter()
                .map(|v| v.record.content_id.clone())
                .filter(|cid| seen.insert(cid.clone()))
                .collect()
        };

        let fanout = self.gateway.config().fanout.max(1);
        let contents: HashMap<ContentId, ContentBlob> = stream::iter(content_ids)
            .map(|cid| {
                let resolver = self.resolver.clone();
                async move {
                    match resolver.resolve(&cid).await {
                        Ok(blob) => Some((cid, blob.value)),
                        Err(err) => {
                            debug!(id = %cid, error = %err, "content unresolved, degrading view");
                            None
                        }
                    }
                }
            })
            .buffered(fanout)
            .filter_map(|pair| async move { pair })
            .collect()
            .await;

        let liked: HashMap<PostId, bool> = stream::iter(ids)
            .map(|id| async move { (id, self.has_liked(id).await.ok()) })
            .buffered(fanout)
            .filter_map(|(id, liked)| async move { liked.map(|liked| (id, liked)) })
            .collect()
            .await;

        for view in views {
            view.content = contents.get(&view.record.content_id).cloned();
            view.viewer_has_liked = liked.get(&view.record.id).copied();
            match view.freshness {
                // A fresh record already reflects settled mutations.
                Freshness::Fresh => self.overlay.confirm_post_counters(view.record.id),
                Freshness::Cached => self.overlay.apply_to_post(&mut view.record),
            }
        }
    }
}

/// Collect mutable references to every available view in a subtree,
/// depth first, preserving reply order.
fn collect_views<'a>(node: &'a mut ThreadNode, out: &mut Vec<&'a mut PostView>) {
    if let ThreadNode::Post { view, replies } = node {
        out.push(view);
        for reply in replies {
            collect_views(reply, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use murmur_content::MemoryContentStore;
    use murmur_ledger::{FakeLedger, GatewayConfig};
    use murmur_shared::{MutationError, PostPayload, NO_PARENT};

    fn addr(byte: u8) -> Address {
        Address([byte; 20])
    }

    struct Fixture {
        ledger: Arc<FakeLedger>,
        store: Arc<MemoryContentStore>,
        client: MurmurClient,
    }

    fn fixture_with_config(config: ClientConfig) -> Fixture {
        let ledger = Arc::new(FakeLedger::new(addr(1)));
        let store = Arc::new(MemoryContentStore::new());
        let client = MurmurClient::new(addr(1), ledger.clone(), store.clone(), config);
        Fixture {
            ledger,
            store,
            client,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_config(ClientConfig::default())
    }

    /// Store a real payload and seed a ledger post pointing at it.
    async fn seed(fx: &Fixture, author: Address, body: &str, reply_to: PostId) -> PostId {
        let payload = PostPayload::new(body.to_string(), None);
        let bytes = payload.to_bytes().unwrap();
        let content_id = fx.store.put(bytes).await.unwrap();
        fx.ledger.seed_post(author, content_id, reply_to).await
    }

    #[tokio::test]
    async fn test_timeline_page_assembles_views() {
        let fx = fixture();
        let a = seed(&fx, addr(2), "first", NO_PARENT).await;
        let b = seed(&fx, addr(2), "second", NO_PARENT).await;
        seed(&fx, addr(3), "a reply", b).await;

        let page = fx.client.timeline_page(None, 10).await.unwrap();
        let ids: Vec<PostId> = page.items.iter().map(|v| v.record.id).collect();
        assert_eq!(ids, vec![b, a]);
        assert_eq!(page.next_cursor, None);
        assert_eq!(page.items[0].content.as_ref().unwrap().body, "second");
        assert_eq!(page.items[0].viewer_has_liked, Some(false));
    }

    #[tokio::test]
    async fn test_toggle_like_is_visible_immediately_without_double_count() {
        let fx = fixture();
        let id = seed(&fx, addr(2), "likeable", NO_PARENT).await;

        // Warm the caches first, as a UI would have.
        assert_eq!(fx.client.post(id).await.unwrap().viewer_has_liked, Some(false));

        assert!(fx.client.toggle_like(id).await.unwrap());
        let view = fx.client.post(id).await.unwrap();
        assert_eq!(view.viewer_has_liked, Some(true));
        assert_eq!(view.record.like_count, 1);

        assert!(!fx.client.toggle_like(id).await.unwrap());
        let view = fx.client.post(id).await.unwrap();
        assert_eq!(view.viewer_has_liked, Some(false));
        assert_eq!(view.record.like_count, 0);
    }

    #[tokio::test]
    async fn test_submit_reply_bumps_parent_once() {
        let fx = fixture();
        let parent = seed(&fx, addr(2), "parent", NO_PARENT).await;
        fx.client.post(parent).await.unwrap();

        let reply = fx
            .client
            .submit_reply(parent, "hello back", None)
            .await
            .unwrap();

        let view = fx.client.post(parent).await.unwrap();
        assert_eq!(view.record.reply_count, 1);

        let thread = fx.client.thread(parent).await.unwrap();
        let ThreadNode::Post { view, replies } = &thread.root else {
            panic!("parent should be available");
        };
        assert_eq!(view.record.id, parent);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].id(), reply);
        // The fresh reply list confirmed the overlay.
        assert_eq!(view.record.reply_count, 1);
    }

    #[tokio::test]
    async fn test_submitted_post_content_needs_no_store_fetch() {
        let fx = fixture();
        let id = fx.client.submit_post("fresh off the press", None).await.unwrap();

        let before = fx.store.get_calls();
        let view = fx.client.post(id).await.unwrap();
        assert_eq!(view.content.as_ref().unwrap().body, "fresh off the press");
        assert_eq!(fx.store.get_calls(), before);
    }

    #[tokio::test]
    async fn test_thread_includes_ancestors_and_content() {
        let fx = fixture();
        let root = seed(&fx, addr(2), "root", NO_PARENT).await;
        let mid = seed(&fx, addr(3), "mid", root).await;
        let leaf = seed(&fx, addr(4), "leaf", mid).await;

        let thread = fx.client.thread(leaf).await.unwrap();
        assert_eq!(thread.ancestors.len(), 2);
        let ChainLink::Post(first) = &thread.ancestors[0] else {
            panic!("root ancestor should be available");
        };
        assert_eq!(first.record.id, root);
        assert_eq!(first.content.as_ref().unwrap().body, "root");
        assert_eq!(thread.root.id(), leaf);
    }

    #[tokio::test]
    async fn test_profile_overlay_served_until_ledger_catches_up() {
        let fx = fixture();
        fx.client
            .submit_profile(ProfileDraft {
                username: Some("ada".into()),
                display_name: "Ada".into(),
                ..ProfileDraft::default()
            })
            .await
            .unwrap();

        let profile = fx.client.profile(addr(1)).await.unwrap();
        assert_eq!(profile.value.username, "ada");
        assert_eq!(profile.value.display_name, "Ada");
    }

    #[tokio::test]
    async fn test_unregistered_profile_is_not_found() {
        let fx = fixture();
        let err = fx.client.profile(addr(9)).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Ledger(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_toggle_follow_updates_overview() {
        let fx = fixture();
        fx.ledger.seed_profile(addr(2), "bob", "Bob").await;

        assert!(fx.client.toggle_follow(addr(2)).await.unwrap());
        let overview = fx.client.profile_overview(addr(2)).await.unwrap();
        assert!(overview.viewer_is_following);
        assert!(overview.followers.contains(&addr(1)));

        assert!(!fx.client.toggle_follow(addr(2)).await.unwrap());
        assert!(!fx.client.is_following(addr(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_content_degrades_view_only() {
        let fx = fixture();
        let id = fx
            .ledger
            .seed_post(addr(2), ContentId::from("never-uploaded"), NO_PARENT)
            .await;

        let view = fx.client.post(id).await.unwrap();
        assert!(view.content.is_none());
        assert_eq!(view.record.id, id);
    }

    #[tokio::test]
    async fn test_stale_record_gets_counter_overlay() {
        let fx = fixture_with_config(ClientConfig {
            gateway: GatewayConfig {
                read_ttl: Duration::from_secs(3600),
                ..GatewayConfig::default()
            },
            ..ClientConfig::default()
        });
        let id = seed(&fx, addr(2), "cached", NO_PARENT).await;

        // Cache the record at count zero, then like: the cached record
        // plus the overlay must still show one like.
        fx.client.post(id).await.unwrap();
        fx.client.toggle_like(id).await.unwrap();
        let view = fx.client.post(id).await.unwrap();
        assert_eq!(view.record.like_count, 1);
        assert_eq!(view.viewer_has_liked, Some(true));
    }

    #[tokio::test]
    async fn test_mutation_slot_released_after_completion() {
        let fx = fixture();
        // Validation failures release the slot immediately.
        assert!(matches!(
            fx.client.submit_post("", None).await.unwrap_err(),
            ClientError::Mutation(MutationError::Validation(_))
        ));
        assert_eq!(
            fx.client.mutation_status(&MutationKey::Post),
            Some(MutationStatus::Failed)
        );
        fx.client.submit_post("ok", None).await.unwrap();
        assert_eq!(
            fx.client.mutation_status(&MutationKey::Post),
            Some(MutationStatus::Confirmed)
        );
    }
}
