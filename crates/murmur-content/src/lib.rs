//! Content-addressed blob plane: the store interface and the resolution
//! cache that turns content identifiers into parsed payloads.

pub mod cache;
pub mod resolver;
pub mod store;

pub use resolver::{ContentResolver, ResolverConfig};
pub use store::{ContentStore, MemoryContentStore};
