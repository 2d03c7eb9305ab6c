//! Optimistic Mutation Coordinator.
//!
//! Sequences every write the same way: validate locally, upload payload
//! bytes to the content store, submit the ledger transaction, then
//! record an optimistic overlay and invalidate the affected gateway
//! entries. A mutation that fails at any stage surfaces the failure;
//! nothing is silently swallowed. At most one mutation per
//! (kind, target) is in flight at a time — a duplicate is rejected
//! immediately rather than queued.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info, warn};

use murmur_content::{ContentResolver, ContentStore};
use murmur_ledger::{Ledger, NewProfile, ProfileUpdate, ReadGateway};
use murmur_shared::constants::{MAX_DISPLAY_NAME_LEN, MAX_POST_BYTES, MAX_USERNAME_LEN};
use murmur_shared::{Address, MutationError, PostId, PostPayload, ProfileRecord, NO_PARENT};

use crate::overlay::{OverlayKind, OverlaySet};

/// Identity of a mutation for duplicate suppression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MutationKey {
    /// Composing a new root post.
    Post,
    /// Replying to a specific post.
    Reply(PostId),
    /// Like/unlike of a specific post.
    Like(PostId),
    /// Follow/unfollow of a specific address.
    Follow(Address),
    /// Creating or updating the viewer's profile.
    Profile,
}

impl MutationKey {
    fn kind(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Reply(_) => "reply",
            Self::Like(_) => "like",
            Self::Follow(_) => "follow",
            Self::Profile => "profile",
        }
    }
}

/// Lifecycle of a mutation.
///
/// The terminal states stay observable until the next mutation begins,
/// which sweeps settled entries; only the non-terminal states block
/// duplicates. `None` from a status query means idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    Drafting,
    ContentUploaded,
    LedgerSubmitted,
    Confirmed,
    Failed,
}

impl MutationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }
}

/// Fields for creating or updating the viewer's profile.
///
/// `username` is required for first-time creation and ignored on
/// update (it is immutable once set). Image bytes, when given, are
/// uploaded to the content store; on update, `None` keeps the current
/// image.
#[derive(Debug, Clone, Default)]
pub struct ProfileDraft {
    pub username: Option<String>,
    pub display_name: String,
    pub avatar: Option<Vec<u8>>,
    pub banner: Option<Vec<u8>>,
}

type InFlight = Arc<Mutex<HashMap<MutationKey, MutationStatus>>>;

/// Marks its mutation `Failed` when dropped before [`Self::confirm`],
/// so a mutation that errors out at any stage releases its slot.
struct FlightGuard {
    map: InFlight,
    key: MutationKey,
    done: bool,
}

impl FlightGuard {
    fn set(&self, status: MutationStatus) {
        self.map
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(self.key.clone(), status);
    }

    fn confirm(mut self) {
        self.set(MutationStatus::Confirmed);
        self.done = true;
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if !self.done {
            self.set(MutationStatus::Failed);
        }
    }
}

pub struct MutationCoordinator {
    viewer: Address,
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn ContentStore>,
    resolver: ContentResolver,
    gateway: ReadGateway,
    overlay: Arc<OverlaySet>,
    in_flight: InFlight,
}

impl MutationCoordinator {
    pub fn new(
        viewer: Address,
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn ContentStore>,
        resolver: ContentResolver,
        gateway: ReadGateway,
        overlay: Arc<OverlaySet>,
    ) -> Self {
        Self {
            viewer,
            ledger,
            store,
            resolver,
            gateway,
            overlay,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Current stage of an in-flight mutation, if any.
    pub fn status(&self, key: &MutationKey) -> Option<MutationStatus> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .copied()
    }

    /// Claim the slot for `key`, rejecting duplicates still in flight.
    fn begin(&self, key: MutationKey) -> Result<FlightGuard, MutationError> {
        let mut map = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if map.get(&key).is_some_and(|s| !s.is_terminal()) {
            warn!(kind = key.kind(), "duplicate mutation rejected");
            return Err(MutationError::AlreadyInFlight(key.kind()));
        }
        // Settled outcomes are kept for observation only; sweep them
        // here so the map never outgrows the set of live mutations.
        map.retain(|_, status| !status.is_terminal());
        map.insert(key.clone(), MutationStatus::Drafting);
        Ok(FlightGuard {
            map: Arc::clone(&self.in_flight),
            key,
            done: false,
        })
    }

    /// Create a root post. Returns the id the ledger assigned.
    pub async fn submit_post(
        &self,
        body: &str,
        image: Option<Vec<u8>>,
    ) -> Result<PostId, MutationError> {
        self.submit_post_inner(MutationKey::Post, body, image, NO_PARENT)
            .await
    }

    /// Reply to an existing post.
    pub async fn submit_reply(
        &self,
        parent: PostId,
        body: &str,
        image: Option<Vec<u8>>,
    ) -> Result<PostId, MutationError> {
        self.submit_post_inner(MutationKey::Reply(parent), body, image, parent)
            .await
    }

    async fn submit_post_inner(
        &self,
        key: MutationKey,
        body: &str,
        image: Option<Vec<u8>>,
        reply_to: PostId,
    ) -> Result<PostId, MutationError> {
        let guard = self.begin(key)?;

        // Drafting: fail fast locally, no network call.
        let body = body.trim();
        if body.is_empty() {
            return Err(MutationError::Validation("post body is empty".into()));
        }
        if body.len() > MAX_POST_BYTES {
            return Err(MutationError::Validation(format!(
                "post body exceeds {MAX_POST_BYTES} bytes"
            )));
        }

        // Content upload. The ledger is not contacted until this
        // succeeds.
        let image_uri = match image {
            Some(bytes) => Some(self.store.put(bytes).await?.0),
            None => None,
        };
        let payload = PostPayload::new(body.to_string(), image_uri);
        let bytes = payload
            .to_bytes()
            .map_err(|e| MutationError::Validation(format!("payload encoding failed: {e}")))?;
        let content_id = self.store.put(bytes).await?;
        guard.set(MutationStatus::ContentUploaded);
        debug!(content_id = %content_id, reply_to, "post payload uploaded");

        guard.set(MutationStatus::LedgerSubmitted);
        let post_id = self
            .ledger
            .create_post(content_id.clone(), payload.has_image, reply_to)
            .await?;
        info!(post_id, reply_to, "post transaction confirmed");

        if reply_to != NO_PARENT {
            self.overlay.record(OverlayKind::Reply {
                parent: reply_to,
                reply_id: post_id,
            });
            self.gateway.invalidate_post(reply_to).await;
            self.gateway.invalidate_replies(reply_to).await;
        }
        self.gateway.invalidate_user_posts(self.viewer).await;
        // We already hold the bytes; the next read should not refetch.
        self.resolver.prime(payload.into_blob(content_id)).await;

        guard.confirm();
        Ok(post_id)
    }

    /// Like or unlike a post.
    pub async fn set_like(&self, post_id: PostId, liked: bool) -> Result<(), MutationError> {
        let guard = self.begin(MutationKey::Like(post_id))?;

        guard.set(MutationStatus::LedgerSubmitted);
        if liked {
            self.ledger.like_post(post_id).await?;
        } else {
            self.ledger.unlike_post(post_id).await?;
        }
        info!(post_id, liked, "like transaction confirmed");

        self.overlay.record(OverlayKind::Like {
            user: self.viewer,
            post_id,
            liked,
        });
        self.gateway.invalidate_liked(self.viewer, post_id).await;
        self.gateway.invalidate_post(post_id).await;
        guard.confirm();
        Ok(())
    }

    /// Follow or unfollow an address.
    pub async fn set_follow(&self, address: Address, following: bool) -> Result<(), MutationError> {
        if address == self.viewer {
            return Err(MutationError::Validation("cannot follow yourself".into()));
        }
        let guard = self.begin(MutationKey::Follow(address))?;

        guard.set(MutationStatus::LedgerSubmitted);
        if following {
            self.ledger.follow_user(address).await?;
        } else {
            self.ledger.unfollow_user(address).await?;
        }
        info!(address = %address, following, "follow transaction confirmed");

        self.overlay.record(OverlayKind::Follow {
            follower: self.viewer,
            followed: address,
            following,
        });
        self.gateway
            .invalidate_follow_state(self.viewer, address)
            .await;
        guard.confirm();
        Ok(())
    }

    /// Create the viewer's profile, or update it if one already exists.
    pub async fn submit_profile(&self, draft: ProfileDraft) -> Result<(), MutationError> {
        let guard = self.begin(MutationKey::Profile)?;

        let display_name = draft.display_name.trim().to_string();
        if display_name.is_empty() {
            return Err(MutationError::Validation("display name is empty".into()));
        }
        if display_name.len() > MAX_DISPLAY_NAME_LEN {
            return Err(MutationError::Validation(format!(
                "display name exceeds {MAX_DISPLAY_NAME_LEN} characters"
            )));
        }

        // The ledger profile decides create vs update. NotFound (or an
        // unregistered placeholder) means create.
        let existing = match self.gateway.profile(self.viewer).await {
            Ok(fetched) if fetched.value.is_registered() => Some(fetched.value),
            _ => None,
        };

        let avatar_id = match draft.avatar {
            Some(bytes) => Some(self.store.put(bytes).await?),
            None => existing.as_ref().and_then(|p| p.avatar_id.clone()),
        };
        let banner_id = match draft.banner {
            Some(bytes) => Some(self.store.put(bytes).await?),
            None => existing.as_ref().and_then(|p| p.banner_id.clone()),
        };
        guard.set(MutationStatus::ContentUploaded);

        guard.set(MutationStatus::LedgerSubmitted);
        let profile = match existing {
            Some(existing) => {
                self.ledger
                    .update_profile(ProfileUpdate {
                        display_name: display_name.clone(),
                        avatar_id: avatar_id.clone(),
                        banner_id: banner_id.clone(),
                    })
                    .await?;
                ProfileRecord {
                    display_name,
                    avatar_id,
                    banner_id,
                    ..existing
                }
            }
            None => {
                let username = draft
                    .username
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or_default()
                    .to_string();
                if username.is_empty() {
                    return Err(MutationError::Validation(
                        "username is required to create a profile".into(),
                    ));
                }
                if username.len() > MAX_USERNAME_LEN {
                    return Err(MutationError::Validation(format!(
                        "username exceeds {MAX_USERNAME_LEN} characters"
                    )));
                }
                self.ledger
                    .create_profile(NewProfile {
                        username: username.clone(),
                        display_name: display_name.clone(),
                        avatar_id: avatar_id.clone(),
                        banner_id: banner_id.clone(),
                    })
                    .await?;
                ProfileRecord {
                    address: self.viewer,
                    username,
                    display_name,
                    avatar_id,
                    banner_id,
                    join_date: Utc::now().timestamp().max(0) as u64,
                }
            }
        };
        info!(address = %self.viewer, "profile transaction confirmed");

        self.overlay.record(OverlayKind::Profile { profile });
        self.gateway.invalidate_profile(self.viewer).await;
        guard.confirm();
        Ok(())
    }
}
