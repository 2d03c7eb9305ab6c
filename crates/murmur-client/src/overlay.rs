//! Optimistic overlay: locally known, not-yet-ledger-confirmed state.
//!
//! The mutation coordinator records an entry for every settled write;
//! the read path merges entries over gateway results so the UI reflects
//! the mutation immediately. An entry is dropped once a fresh ledger
//! read shows the same state, or after a bounded timeout, whichever
//! comes first. Ownership is explicit and central, so correctness does
//! not depend on which view happens to be mounted.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use murmur_shared::{Address, PostId, PostRecord, ProfileRecord};

#[derive(Debug, Clone, PartialEq)]
pub enum OverlayKind {
    /// The viewer liked (or unliked) a post.
    Like {
        user: Address,
        post_id: PostId,
        liked: bool,
    },
    /// The viewer replied to `parent` with the new post `reply_id`.
    Reply { parent: PostId, reply_id: PostId },
    /// The viewer followed (or unfollowed) an address.
    Follow {
        follower: Address,
        followed: Address,
        following: bool,
    },
    /// The viewer created or updated their profile.
    Profile { profile: ProfileRecord },
}

impl OverlayKind {
    /// Two entries with the same slot replace each other (a like
    /// followed by an unlike keeps only the latest intent).
    fn same_slot(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Like { user, post_id, .. },
                Self::Like {
                    user: u2,
                    post_id: p2,
                    ..
                },
            ) => user == u2 && post_id == p2,
            (
                Self::Reply {
                    parent, reply_id, ..
                },
                Self::Reply {
                    parent: pa2,
                    reply_id: r2,
                },
            ) => parent == pa2 && reply_id == r2,
            (
                Self::Follow {
                    follower, followed, ..
                },
                Self::Follow {
                    follower: f2,
                    followed: d2,
                    ..
                },
            ) => follower == f2 && followed == d2,
            (Self::Profile { profile }, Self::Profile { profile: p2 }) => {
                profile.address == p2.address
            }
            _ => false,
        }
    }
}

struct OverlayEntry {
    kind: OverlayKind,
    recorded_at: Instant,
}

/// The set of live overlay entries. Shared between the coordinator
/// (writer) and the facade's read paths (readers).
pub struct OverlaySet {
    timeout: Duration,
    entries: Mutex<Vec<OverlayEntry>>,
}

impl OverlaySet {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            entries: Mutex::new(Vec::new()),
        }
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut Vec<OverlayEntry>) -> R) -> R {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let timeout = self.timeout;
        entries.retain(|e| e.recorded_at.elapsed() < timeout);
        f(&mut entries)
    }

    pub fn record(&self, kind: OverlayKind) {
        debug!(overlay = ?kind, "recording optimistic overlay");
        self.with_entries(|entries| {
            entries.retain(|e| !e.kind.same_slot(&kind));
            entries.push(OverlayEntry {
                kind,
                recorded_at: Instant::now(),
            });
        });
    }

    pub fn len(&self) -> usize {
        self.with_entries(|entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -- Like state --

    pub fn like_state(&self, user: Address, post_id: PostId) -> Option<bool> {
        self.with_entries(|entries| {
            entries.iter().find_map(|e| match &e.kind {
                OverlayKind::Like {
                    user: u,
                    post_id: p,
                    liked,
                } if *u == user && *p == post_id => Some(*liked),
                _ => None,
            })
        })
    }

    /// Drop a like overlay that a fresh ledger read now agrees with.
    pub fn confirm_like(&self, user: Address, post_id: PostId, ledger_liked: bool) {
        self.with_entries(|entries| {
            entries.retain(|e| match &e.kind {
                OverlayKind::Like {
                    user: u,
                    post_id: p,
                    liked,
                } => !(*u == user && *p == post_id && *liked == ledger_liked),
                _ => true,
            });
        });
    }

    // -- Follow state --

    pub fn follow_state(&self, follower: Address, followed: Address) -> Option<bool> {
        self.with_entries(|entries| {
            entries.iter().find_map(|e| match &e.kind {
                OverlayKind::Follow {
                    follower: f,
                    followed: d,
                    following,
                } if *f == follower && *d == followed => Some(*following),
                _ => None,
            })
        })
    }

    pub fn confirm_follow(&self, follower: Address, followed: Address, ledger_following: bool) {
        self.with_entries(|entries| {
            entries.retain(|e| match &e.kind {
                OverlayKind::Follow {
                    follower: f,
                    followed: d,
                    following,
                } => !(*f == follower && *d == followed && *following == ledger_following),
                _ => true,
            });
        });
    }

    /// Adjust an edge list (followers of X, or accounts X follows) for
    /// pending follow mutations involving `subject`.
    pub fn apply_to_followers(&self, followed: Address, list: &mut Vec<Address>) {
        self.with_entries(|entries| {
            for e in entries.iter() {
                if let OverlayKind::Follow {
                    follower,
                    followed: d,
                    following,
                } = &e.kind
                {
                    if *d != followed {
                        continue;
                    }
                    if *following && !list.contains(follower) {
                        list.push(*follower);
                    } else if !*following {
                        list.retain(|a| a != follower);
                    }
                }
            }
        });
    }

    pub fn apply_to_following(&self, follower: Address, list: &mut Vec<Address>) {
        self.with_entries(|entries| {
            for e in entries.iter() {
                if let OverlayKind::Follow {
                    follower: f,
                    followed,
                    following,
                } = &e.kind
                {
                    if *f != follower {
                        continue;
                    }
                    if *following && !list.contains(followed) {
                        list.push(*followed);
                    } else if !*following {
                        list.retain(|a| a != followed);
                    }
                }
            }
        });
    }

    // -- Replies --

    /// Drop reply overlays whose reply id a fresh reply list now contains.
    pub fn confirm_replies(&self, parent: PostId, reply_ids: &[PostId]) {
        self.with_entries(|entries| {
            entries.retain(|e| match &e.kind {
                OverlayKind::Reply {
                    parent: p,
                    reply_id,
                } => !(*p == parent && reply_ids.contains(reply_id)),
                _ => true,
            });
        });
    }

    // -- Profiles --

    pub fn profile_for(&self, address: Address) -> Option<ProfileRecord> {
        self.with_entries(|entries| {
            entries.iter().find_map(|e| match &e.kind {
                OverlayKind::Profile { profile } if profile.address == address => {
                    Some(profile.clone())
                }
                _ => None,
            })
        })
    }

    /// Drop a profile overlay once the ledger serves a matching record.
    pub fn confirm_profile(&self, ledger_profile: &ProfileRecord) {
        self.with_entries(|entries| {
            entries.retain(|e| match &e.kind {
                OverlayKind::Profile { profile } => !(profile.address == ledger_profile.address
                    && profile.display_name == ledger_profile.display_name
                    && profile.username == ledger_profile.username),
                _ => true,
            });
        });
    }

    /// Drop counter overlays for a post the ledger just served fresh.
    ///
    /// Entries are recorded only after their transaction settled, so a
    /// fresh read of the post already reflects them.
    pub fn confirm_post_counters(&self, post_id: PostId) {
        self.with_entries(|entries| {
            entries.retain(|e| match &e.kind {
                OverlayKind::Like { post_id: p, .. } => *p != post_id,
                OverlayKind::Reply { parent, .. } => *parent != post_id,
                _ => true,
            });
        });
    }

    // -- Counter merging --

    /// Merge pending like/reply effects into a post record's counters.
    ///
    /// Call this after `confirm_like`/`confirm_replies` on the same
    /// read, so effects the ledger already reflects are not applied a
    /// second time.
    pub fn apply_to_post(&self, record: &mut PostRecord) {
        self.with_entries(|entries| {
            for e in entries.iter() {
                match &e.kind {
                    OverlayKind::Like { post_id, liked, .. } if *post_id == record.id => {
                        if *liked {
                            record.like_count = record.like_count.saturating_add(1);
                        } else {
                            record.like_count = record.like_count.saturating_sub(1);
                        }
                    }
                    OverlayKind::Reply { parent, .. } if *parent == record.id => {
                        record.reply_count = record.reply_count.saturating_add(1);
                    }
                    _ => {}
                }
            }
        });
    }
}
