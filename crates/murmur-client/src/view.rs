//! Presentable structures assembled by the read path.

use murmur_shared::{Address, ContentBlob, Fetched, Freshness, PostId, PostRecord, ProfileRecord};

/// A post ready for rendering: the ledger record plus whatever could be
/// resolved around it. Missing content or an unknown like flag degrade
/// the view, never fail it.
#[derive(Debug, Clone, PartialEq)]
pub struct PostView {
    pub record: PostRecord,
    /// Resolved payload; `None` means the content store could not
    /// produce it (render as an "unavailable" placeholder).
    pub content: Option<ContentBlob>,
    /// Whether the viewer has liked this post; `None` means unknown.
    pub viewer_has_liked: Option<bool>,
    /// Staleness of the underlying record.
    pub freshness: Freshness,
}

impl PostView {
    /// View with only the record filled in; content and like state are
    /// attached later by the facade.
    pub fn bare(record: Fetched<PostRecord>) -> Self {
        Self {
            record: record.value,
            content: None,
            viewer_has_liked: None,
            freshness: record.freshness,
        }
    }
}

/// One page of root posts, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelinePage {
    pub items: Vec<PostView>,
    /// Cursor for the next page; `None` once the scan reached id 1.
    pub next_cursor: Option<PostId>,
}

/// A node in a reply subtree.
#[derive(Debug, Clone, PartialEq)]
pub enum ThreadNode {
    Post {
        view: PostView,
        replies: Vec<ThreadNode>,
    },
    /// The id is referenced by the thread but its record could not be
    /// fetched. A leaf: traversal does not descend through it.
    Unavailable { id: PostId },
}

impl ThreadNode {
    pub fn id(&self) -> PostId {
        match self {
            Self::Post { view, .. } => view.record.id,
            Self::Unavailable { id } => *id,
        }
    }

    /// Total posts in this subtree, unavailable nodes included.
    pub fn size(&self) -> usize {
        match self {
            Self::Post { replies, .. } => 1 + replies.iter().map(ThreadNode::size).sum::<usize>(),
            Self::Unavailable { .. } => 1,
        }
    }
}

/// One step of an ancestor chain.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainLink {
    Post(PostView),
    /// An ancestor the ledger could not produce; the chain stops here.
    Unavailable(PostId),
}

/// A full thread view: the path up to the root, and the reply subtree
/// below the requested post.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadView {
    /// Ancestors, nearest root first. Empty when the requested post is
    /// itself a root.
    pub ancestors: Vec<ChainLink>,
    pub root: ThreadNode,
}

/// Profile page data: the profile plus its social surroundings.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileOverview {
    pub profile: Fetched<ProfileRecord>,
    pub followers: Vec<Address>,
    pub following: Vec<Address>,
    /// Ids of posts authored by this profile, ascending.
    pub post_ids: Vec<PostId>,
    pub viewer_is_following: bool,
}
