//! Thread Assembler.
//!
//! Reconstructs reply chains from stored parent pointers and reply-id
//! lists. Parent pointers are write-once integers with no
//! ledger-enforced acyclicity, so traversal treats cycles and dangling
//! references as data anomalies to route around: a visited set stops
//! revisits, a depth cap guarantees termination, and a missing post
//! becomes an "unavailable" leaf instead of failing the walk.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use murmur_ledger::ReadGateway;
use murmur_shared::{Fetched, LedgerError, PostId, PostRecord, NO_PARENT};

use crate::view::{ChainLink, PostView, ThreadNode};

pub struct ThreadAssembler {
    gateway: ReadGateway,
    max_depth: usize,
}

impl ThreadAssembler {
    pub fn new(gateway: ReadGateway, max_depth: usize) -> Self {
        Self {
            gateway,
            max_depth: max_depth.max(1),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Walk parent pointers up from `post_id`, returning the chain of
    /// ancestors nearest root first. The post itself is not included;
    /// a root post yields an empty chain.
    ///
    /// An unreachable ancestor ends the chain with an
    /// [`ChainLink::Unavailable`] marker. A cycle silently terminates
    /// the walk.
    pub async fn ancestor_chain(&self, post_id: PostId) -> Result<Vec<ChainLink>, LedgerError> {
        let start = self.gateway.post(post_id).await?;

        let mut chain = Vec::new();
        let mut visited = HashSet::from([post_id]);
        let mut parent = start.value.reply_to;

        while parent != NO_PARENT && chain.len() < self.max_depth {
            if !visited.insert(parent) {
                debug!(post_id, parent, "parent pointer cycle, stopping ancestor walk");
                break;
            }
            match self.gateway.post(parent).await {
                Ok(record) => {
                    let next = record.value.reply_to;
                    chain.push(ChainLink::Post(PostView::bare(record)));
                    parent = next;
                }
                Err(err) => {
                    debug!(parent, error = %err, "ancestor unavailable, stopping walk");
                    chain.push(ChainLink::Unavailable(parent));
                    break;
                }
            }
        }

        chain.reverse();
        Ok(chain)
    }

    /// Build the reply subtree below `post_id`, breadth-first, at most
    /// `max_depth` levels of replies deep (further capped by the
    /// assembler's own limit).
    ///
    /// Fetches within a level fan out concurrently through the gateway;
    /// the assembled tree preserves the ledger's reply ordering. Item
    /// failures degrade to [`ThreadNode::Unavailable`] leaves.
    pub async fn reply_subtree(&self, post_id: PostId, max_depth: usize) -> ThreadNode {
        let depth_cap = max_depth.min(self.max_depth);

        let mut records: HashMap<PostId, Fetched<PostRecord>> = HashMap::new();
        let mut children: HashMap<PostId, Vec<PostId>> = HashMap::new();
        let mut visited = HashSet::from([post_id]);

        let mut frontier = vec![post_id];
        let mut depth = 0;
        while !frontier.is_empty() {
            for (id, result) in self.gateway.posts(&frontier).await {
                match result {
                    Ok(record) => {
                        records.insert(id, record);
                    }
                    Err(err) => {
                        debug!(id, error = %err, "post unavailable in subtree");
                    }
                }
            }

            if depth >= depth_cap {
                break;
            }

            // Only descend through posts we could actually fetch.
            let parents: Vec<PostId> = frontier
                .iter()
                .copied()
                .filter(|id| records.contains_key(id))
                .collect();

            let mut next = Vec::new();
            for (id, result) in self.gateway.replies_many(&parents).await {
                let reply_ids = match result {
                    Ok(list) => list.value,
                    Err(err) => {
                        debug!(id, error = %err, "reply list unavailable, treating as empty");
                        Vec::new()
                    }
                };
                // The visited set terminates cyclic or duplicated
                // branches without erroring the operation.
                let kids: Vec<PostId> = reply_ids
                    .into_iter()
                    .filter(|reply| visited.insert(*reply))
                    .collect();
                next.extend(kids.iter().copied());
                children.insert(id, kids);
            }

            frontier = next;
            depth += 1;
        }

        build_node(post_id, &records, &children)
    }
}

fn build_node(
    id: PostId,
    records: &HashMap<PostId, Fetched<PostRecord>>,
    children: &HashMap<PostId, Vec<PostId>>,
) -> ThreadNode {
    match records.get(&id) {
        Some(record) => {
            let replies = children
                .get(&id)
                .map(|kids| {
                    kids.iter()
                        .map(|kid| build_node(*kid, records, children))
                        .collect()
                })
                .unwrap_or_default();
            ThreadNode::Post {
                view: PostView::bare(record.clone()),
                replies,
            }
        }
        None => ThreadNode::Unavailable { id },
    }
}
