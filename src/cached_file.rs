//! An internal cache cell, which holds a prefetched file's bytes plus the bookkeeping that decides when it goes away.
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::CanonicalPath;

#[derive(Debug)]
pub(crate) struct CachedFile {
    pub(crate) path: CanonicalPath,
    /// `None` until loaded, and again once released.
    pub(crate) content: Option<Arc<[u8]>>,
    /// Lookups this entry is still reserved for.
    pub(crate) ref_count: u32,
    /// Declared size from the feed; used for admission before anything is read.
    pub(crate) size: u64,
    pub(crate) requested_at: Instant,
    pub(crate) loaded_at: Option<Instant>,
    pub(crate) lifetime: Duration,
}

impl CachedFile {
    pub(crate) fn requested(
        path: CanonicalPath,
        size: u64,
        ref_count: u32,
        lifetime: Duration,
        now: Instant,
    ) -> CachedFile {
        CachedFile {
            path,
            content: None,
            ref_count,
            size,
            requested_at: now,
            loaded_at: None,
            lifetime,
        }
    }

    /// Consume one reservation.  Returns true when none are left and the entry should be released.
    pub(crate) fn dereference(&mut self) -> bool {
        self.ref_count = self.ref_count.saturating_sub(1);
        self.ref_count == 0
    }

    /// Fold another feed of the same file into this one.
    pub(crate) fn merge(&mut self, ref_count: u32, lifetime: Duration) {
        self.ref_count = self.ref_count.saturating_add(ref_count);
        self.lifetime = self.lifetime.max(lifetime);
    }

    /// Unloaded entries never expire; only the request queue or a flush gets rid of them.
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        match self.loaded_at {
            Some(loaded) => now.saturating_duration_since(loaded) > self.lifetime,
            None => false,
        }
    }

    /// Number of bytes this entry holds against the memory limit.
    pub(crate) fn resident_bytes(&self) -> u64 {
        self.content.as_ref().map(|c| c.len() as u64).unwrap_or(0)
    }

    /// Drop our reference to the bytes, returning how many bytes were held.
    ///
    /// Anyone who already got the buffer from a lookup keeps it alive; we only stop accounting for it.
    pub(crate) fn release(&mut self) -> u64 {
        let freed = self.resident_bytes();
        self.content = None;
        freed
    }
}
