//! Frontier queue and visited set of one crawl task
//!
//! The frontier is plain in-memory state; the orchestrator keeps it behind
//! its mutex so that the visited check-and-insert is a single step. URLs are
//! keyed by `site_key`, so scheme and `www.` variants of one page collapse.

use crate::url::{site_key, LinkKind};
use std::collections::{HashSet, VecDeque};
use url::Url;

/// A normalized URL awaiting dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub url: Url,

    /// Discovery depth (seed is 0)
    pub depth: u32,

    pub kind: LinkKind,
}

/// FIFO queue of entries plus the enqueued and visited URL sets
#[derive(Debug, Default)]
pub struct Frontier {
    queue: VecDeque<FrontierEntry>,
    enqueued: HashSet<String>,
    visited: HashSet<String>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues an entry unless its URL was ever enqueued before
    ///
    /// # Returns
    ///
    /// `true` if the entry was added
    pub fn push(&mut self, entry: FrontierEntry) -> bool {
        let key = site_key(&entry.url);
        if self.visited.contains(&key) || !self.enqueued.insert(key) {
            return false;
        }
        self.queue.push_back(entry);
        true
    }

    /// Marks a URL as dispatched
    ///
    /// # Returns
    ///
    /// `false` if the URL had already been dispatched
    pub fn mark_visited(&mut self, url: &Url) -> bool {
        self.visited.insert(site_key(url))
    }

    /// Number of URLs dispatched so far
    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    /// Number of distinct URLs ever enqueued
    pub fn discovered_count(&self) -> usize {
        self.enqueued.len()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Removes and returns the first entry `decide` accepts
    ///
    /// Entries judged `Verdict::Drop` (and already visited ones) are removed
    /// on the way; `Verdict::Keep` entries stay queued in order.
    pub fn take_next<F>(&mut self, mut decide: F) -> Option<FrontierEntry>
    where
        F: FnMut(&FrontierEntry) -> Verdict,
    {
        let mut i = 0;
        while i < self.queue.len() {
            let verdict = if self.visited.contains(&site_key(&self.queue[i].url)) {
                Verdict::Drop
            } else {
                decide(&self.queue[i])
            };
            match verdict {
                Verdict::Take => return self.queue.remove(i),
                Verdict::Drop => {
                    self.queue.remove(i);
                }
                Verdict::Keep => i += 1,
            }
        }
        None
    }
}

/// Decision about one queued entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Dispatch it now
    Take,
    /// Leave it queued for later
    Keep,
    /// Discard it for good
    Drop,
}
