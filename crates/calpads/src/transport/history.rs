//! Bounded record of terminal pages reached by the transport.
//!
//! Diagnostic only: workflows thread the returned [`super::Page`] through
//! explicitly and never read "the last page" from here.

use std::collections::VecDeque;

use url::Url;

/// Summary of a terminal response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitedPage {
    pub url: Url,
    pub status: u16,
}

/// Fixed-capacity history; the oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct History {
    capacity: usize,
    entries: VecDeque<VisitedPage>,
}

impl History {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, page: VisitedPage) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(page);
    }

    /// Most recent terminal page.
    pub fn last(&self) -> Option<&VisitedPage> {
        self.entries.back()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &VisitedPage> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
