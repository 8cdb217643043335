//! Batch cursor paging through the unread-id list a fixed number at a time.
//!
//! The unread list is re-fetched every cycle, so `position` only means "how
//! many of this cycle's ids have been handled", not a durable mailbox marker.

use tracing::debug;

/// Offset into the current unread-id list.
#[derive(Debug, Clone, Default)]
pub struct BatchCursor {
    position: usize,
}

impl BatchCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Return the next page of `all` and advance.
    ///
    /// Wraps to the start once the position has reached the end of `all`.
    pub fn next_batch<'a, T>(&mut self, all: &'a [T], page_size: usize) -> &'a [T] {
        if self.position >= all.len() {
            self.position = 0;
        }

        let start = self.position;
        let end = start.saturating_add(page_size).min(all.len());
        self.position = end;

        debug!(start, end, total = all.len(), "Emails to process");
        &all[start..end]
    }
}
