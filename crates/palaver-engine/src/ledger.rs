//! Bounded recent-id membership sets.
//!
//! Three independent sets back the dedup decisions: `seen` (message ids
//! applied this process), `broadcast` (bus envelope ids), and `deleted`
//! (user-deleted message ids, seeded from the store's durable tombstones).
//! Each is capped; eviction keeps the most recent half and is applied lazily
//! on insert. This component cannot fail, only grow and shrink.

use std::collections::{HashSet, VecDeque};

use palaver_shared::constants::{LEDGER_CAP, LEDGER_KEEP};

/// An insertion-ordered set with a cap and keep-recent-half eviction.
#[derive(Debug)]
pub struct BoundedIdSet {
    order: VecDeque<String>,
    members: HashSet<String>,
    cap: usize,
    keep: usize,
}

impl BoundedIdSet {
    pub fn new(cap: usize, keep: usize) -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
            cap,
            keep,
        }
    }

    /// Insert an id. Returns whether it was newly inserted.
    pub fn insert(&mut self, id: &str) -> bool {
        if !self.members.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());

        if self.order.len() > self.cap {
            let evict = self.order.len() - self.keep;
            for old in self.order.drain(..evict) {
                self.members.remove(&old);
            }
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Default for BoundedIdSet {
    fn default() -> Self {
        Self::new(LEDGER_CAP, LEDGER_KEEP)
    }
}

/// The three per-window dedup sets.
///
/// Per-window by design: cross-window convergence is the store's job (its
/// writes are id-keyed upserts), the ledger only suppresses reprocessing and
/// re-broadcast inside one window.
#[derive(Debug, Default)]
pub struct DedupLedger {
    seen: BoundedIdSet,
    broadcast: BoundedIdSet,
    deleted: BoundedIdSet,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic check-and-set: whether this message id was already seen,
    /// inserting it if not. Ids are never empty here; legacy id-less
    /// messages are deduplicated by triple scan in the session log instead.
    pub fn is_duplicate(&mut self, id: &str) -> bool {
        !self.seen.insert(id)
    }

    /// Record a user-initiated delete. The caller persists the durable
    /// tombstone; this only covers the in-process fast path.
    pub fn mark_deleted(&mut self, id: &str) {
        self.deleted.insert(id);
    }

    pub fn is_deleted(&self, id: &str) -> bool {
        self.deleted.contains(id)
    }

    /// Whether this is the first time the envelope id goes over the bus,
    /// for suppression of re-broadcast loops.
    pub fn mark_broadcast(&mut self, id: &str) -> bool {
        self.broadcast.insert(id)
    }

    /// Seed the deleted set from the store's durable tombstones at startup.
    pub fn seed_deleted<I: IntoIterator<Item = String>>(&mut self, ids: I) {
        for id in ids {
            self.deleted.insert(&id);
        }
    }
}
