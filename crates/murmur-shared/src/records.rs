//! Record schemas for the two data planes.
//!
//! `PostRecord` and `ProfileRecord` are the fixed shapes the ledger
//! gateway validates incoming data against. `PostPayload` and
//! `ProfilePayload` are the JSON wire records stored in the
//! content-addressed blob store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Address, ContentId, PostId, NO_PARENT};

/// A post as indexed by the ledger.
///
/// Immutable once observed, except `like_count` and `reply_count`, which
/// may increase monotonically between reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostRecord {
    pub id: PostId,
    pub author: Address,
    pub content_id: ContentId,
    pub timestamp: u64,
    /// Parent post id; [`NO_PARENT`] for a root post.
    pub reply_to: PostId,
    pub like_count: u64,
    pub reply_count: u64,
}

impl PostRecord {
    pub fn is_root(&self) -> bool {
        self.reply_to == NO_PARENT
    }
}

/// A user profile as indexed by the ledger. At most one per address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileRecord {
    pub address: Address,
    /// Immutable once set; empty means the address never registered.
    pub username: String,
    pub display_name: String,
    pub avatar_id: Option<ContentId>,
    pub banner_id: Option<ContentId>,
    pub join_date: u64,
}

impl ProfileRecord {
    pub fn is_registered(&self) -> bool {
        !self.username.is_empty()
    }
}

/// A resolved post payload from the content store.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentBlob {
    pub content_id: ContentId,
    pub body: String,
    pub image_id: Option<ContentId>,
    pub has_image: bool,
    pub created_at: DateTime<Utc>,
}

/// Wire record for a post body as stored in the content store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostPayload {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub has_image: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image_uri: Option<String>,
}

impl PostPayload {
    pub fn new(content: String, image_uri: Option<String>) -> Self {
        Self {
            content,
            timestamp: Utc::now(),
            has_image: image_uri.is_some(),
            image_uri,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Build the resolved blob for a payload fetched under `id`.
    pub fn into_blob(self, id: ContentId) -> ContentBlob {
        ContentBlob {
            content_id: id,
            image_id: self.image_uri.map(ContentId),
            has_image: self.has_image,
            body: self.content,
            created_at: self.timestamp,
        }
    }
}

/// Wire record for profile metadata as stored in the content store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePayload {
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_uri: String,
    #[serde(default)]
    pub banner_uri: String,
}
