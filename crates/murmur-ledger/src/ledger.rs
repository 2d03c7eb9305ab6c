//! The ledger collaborator interface.
//!
//! The ledger offers point lookups only: no bulk query, no descending
//! scan, no change notification. Mutating calls act as the connected
//! account (the signer is part of the client handle, not the call) and
//! resolve once the transaction settles.

use async_trait::async_trait;

use murmur_shared::{Address, ContentId, LedgerError, PostId, PostRecord, ProfileRecord, TxError};

/// Parameters for first-time profile registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProfile {
    pub username: String,
    pub display_name: String,
    pub avatar_id: Option<ContentId>,
    pub banner_id: Option<ContentId>,
}

/// Parameters for updating an existing profile. The username is
/// immutable once set and therefore absent here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub display_name: String,
    pub avatar_id: Option<ContentId>,
    pub banner_id: Option<ContentId>,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    // -- Point reads --

    async fn get_post(&self, id: PostId) -> Result<PostRecord, LedgerError>;
    async fn get_profile(&self, address: Address) -> Result<ProfileRecord, LedgerError>;
    /// Ids of all posts authored by `address`, ascending.
    async fn get_user_posts(&self, address: Address) -> Result<Vec<PostId>, LedgerError>;
    /// Ids of direct replies to `id`, ascending.
    async fn get_replies(&self, id: PostId) -> Result<Vec<PostId>, LedgerError>;
    async fn check_liked(&self, address: Address, id: PostId) -> Result<bool, LedgerError>;
    async fn get_followers(&self, address: Address) -> Result<Vec<Address>, LedgerError>;
    async fn get_following(&self, address: Address) -> Result<Vec<Address>, LedgerError>;
    async fn check_following(
        &self,
        follower: Address,
        followed: Address,
    ) -> Result<bool, LedgerError>;
    /// Highest post id assigned so far; 0 if no posts exist.
    async fn latest_post_id(&self) -> Result<PostId, LedgerError>;

    // -- Mutations (resolve when the transaction settles) --

    async fn create_profile(&self, profile: NewProfile) -> Result<(), TxError>;
    async fn update_profile(&self, update: ProfileUpdate) -> Result<(), TxError>;
    /// Returns the id assigned to the new post.
    async fn create_post(
        &self,
        content_id: ContentId,
        has_image: bool,
        reply_to: PostId,
    ) -> Result<PostId, TxError>;
    async fn like_post(&self, id: PostId) -> Result<(), TxError>;
    async fn unlike_post(&self, id: PostId) -> Result<(), TxError>;
    async fn follow_user(&self, address: Address) -> Result<(), TxError>;
    async fn unfollow_user(&self, address: Address) -> Result<(), TxError>;
}
