//! Read/write reconciliation layer for a Murmur social timeline.
//!
//! Canonical state lives in two places the client does not control: an
//! append-only ledger holding post, profile, follow and like indices,
//! and a content-addressed store holding post payloads. This crate
//! reconciles the two behind one handle, [`MurmurClient`]: cached,
//! deduplicated reads assembled into render-ready views, and writes
//! sequenced upload-then-submit with an optimistic overlay so the
//! viewer's own actions are visible before the ledger indexes them.

pub mod client;
pub mod config;
pub mod mutation;
pub mod overlay;
pub mod thread;
pub mod timeline;
pub mod view;

pub use client::MurmurClient;
pub use config::ClientConfig;
pub use mutation::{MutationKey, MutationStatus, ProfileDraft};
pub use view::{ChainLink, PostView, ProfileOverview, ThreadNode, ThreadView, TimelinePage};

pub use murmur_content::{ContentStore, MemoryContentStore};
pub use murmur_ledger::{FakeLedger, Ledger, NewProfile, ProfileUpdate};
pub use murmur_shared::{Address, ClientError, ContentId, Fetched, Freshness, PostId};

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize tracing for binaries embedding the client. Respects
/// RUST_LOG; safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("murmur_client=debug,murmur_ledger=debug,murmur_content=debug,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
