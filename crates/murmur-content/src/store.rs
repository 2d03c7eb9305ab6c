use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use murmur_shared::{ContentError, ContentId};

/// The content store collaborator: `put` bytes, get an identifier back;
/// `get` the same bytes by identifier later.
///
/// Identifiers are content-derived, so `put` of identical bytes yields
/// the identical identifier on every store implementation.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentId, ContentError>;
    async fn get(&self, id: &ContentId) -> Result<Vec<u8>, ContentError>;
}

/// In-memory content-addressed store.
///
/// Identifiers are hex-encoded BLAKE3 hashes of the bytes. Used for
/// local development and as the test double for the real store.
#[derive(Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    get_calls: AtomicUsize,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get` calls served so far. Lets tests assert that
    /// caching and single-flight actually suppressed fetches.
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn derive_id(bytes: &[u8]) -> ContentId {
        ContentId(hex::encode(blake3::hash(bytes).as_bytes()))
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentId, ContentError> {
        if bytes.is_empty() {
            return Err(ContentError::unavailable("refusing to store empty blob"));
        }
        let id = Self::derive_id(&bytes);
        let size = bytes.len();
        self.blobs.write().await.insert(id.0.clone(), bytes);
        debug!(id = %id, size, "stored blob");
        Ok(id)
    }

    async fn get(&self, id: &ContentId) -> Result<Vec<u8>, ContentError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.blobs
            .read()
            .await
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| ContentError::NotFound(id.0.clone()))
    }
}
