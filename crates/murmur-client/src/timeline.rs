//! Timeline Paginator.
//!
//! The ledger exposes only the highest assigned id plus point lookups,
//! so a page is produced by scanning ids downward from the cursor,
//! fetching each through the gateway, and keeping root posts until the
//! page fills. The next cursor is the last *examined* id minus one:
//! posts created after the first page started appear only above the
//! original cursor, so later pages never shift or repeat.

use tracing::debug;

use murmur_ledger::ReadGateway;
use murmur_shared::{Fetched, LedgerError, PostId, PostRecord};

/// One page of root post records, descending by id.
#[derive(Debug, Clone, PartialEq)]
pub struct RootPage {
    pub records: Vec<Fetched<PostRecord>>,
    pub next_cursor: Option<PostId>,
}

pub struct TimelinePaginator {
    gateway: ReadGateway,
}

impl TimelinePaginator {
    pub fn new(gateway: ReadGateway) -> Self {
        Self { gateway }
    }

    /// Produce the page of up to `page_size` root posts at or below
    /// `cursor` (the current highest id when `None`).
    ///
    /// Replies are filtered out; an unavailable record is skipped and
    /// degrades only itself, never the page.
    pub async fn page(
        &self,
        cursor: Option<PostId>,
        page_size: usize,
    ) -> Result<RootPage, LedgerError> {
        let start = match cursor {
            Some(cursor) => cursor,
            None => self.gateway.latest_post_id().await?,
        };

        let mut records = Vec::new();
        // Next id to examine; 0 means the scan is exhausted.
        let mut remaining = start;

        while remaining >= 1 && records.len() < page_size {
            let want = page_size - records.len();
            // Overscan a little: some of the ids will be replies.
            let span = (want + want / 2 + 1).max(self.gateway.config().fanout) as u64;
            let low = remaining.saturating_sub(span - 1).max(1);
            let chunk: Vec<PostId> = (low..=remaining).rev().collect();

            for (id, result) in self.gateway.posts(&chunk).await {
                if records.len() == page_size {
                    break;
                }
                match result {
                    Ok(record) if record.value.is_root() => records.push(record),
                    Ok(_) => {}
                    Err(err) => {
                        debug!(id, error = %err, "skipping unavailable post in page scan");
                    }
                }
                remaining = id - 1;
            }
        }

        let next_cursor = (remaining >= 1).then_some(remaining);
        Ok(RootPage {
            records,
            next_cursor,
        })
    }
}
