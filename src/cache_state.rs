//! Everything the streaming cache mutates, behind one lock.
//!
//! [CacheState] holds the ready table, the request queue, the one load the worker may have in flight, the
//! pending-release list and the used-memory counter.  Nothing here blocks or does I/O: the worker copies a path out with
//! [CacheState::begin_load], reads without the lock, then comes back through [CacheState::finish_load].
//!
//! Entries move through ready → pending-release → freed.  Only the release pass subtracts from `used_memory`, so the
//! counter always equals the bytes held by the ready table plus the pending-release list, and equals the ready table
//! alone once a release pass has run.
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::cached_file::CachedFile;
use crate::entry_table::EntryTable;
use crate::*;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Created,
    Running,
    Stopped,
}

/// The load the worker is currently performing outside the lock.
#[derive(Debug)]
struct InFlight {
    file: CachedFile,
    /// Set by a flush while the read was happening; the result is thrown away.
    cancelled: bool,
}

pub(crate) struct CacheState {
    ready: EntryTable<CanonicalPath, CachedFile>,
    requested: EntryTable<CanonicalPath, CachedFile>,
    in_flight: Option<InFlight>,
    pending_release: Vec<CachedFile>,
    used_memory: u64,
    /// Set when the worker should run a pass without waiting out the poll interval.
    pub(crate) wake: bool,
    pub(crate) lifecycle: Lifecycle,
}

impl CacheState {
    pub(crate) fn new() -> CacheState {
        CacheState {
            ready: EntryTable::new(),
            requested: EntryTable::new(),
            in_flight: None,
            pending_release: vec![],
            used_memory: 0,
            wake: false,
            lifecycle: Lifecycle::Created,
        }
    }

    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            used_memory: self.used_memory,
            ready_files: self.ready.len(),
            queued_requests: self.requested.len() + self.in_flight.iter().count(),
            pending_release: self.pending_release.len(),
        }
    }

    fn schedule_release(&mut self, file: CachedFile) {
        self.pending_release.push(file);
        self.wake = true;
    }

    /// Queue every file in `usage`, reserving it for as many lookups as it was accessed.
    pub(crate) fn feed(&mut self, usage: &UsageSnapshot, lifetime: Duration, now: Instant) {
        for record in usage.files.iter() {
            if record.access_count == 0 {
                trace!(path = %record.path, "skipping feed record with no accesses");
                continue;
            }

            if let Some(file) = self.ready.get_mut(&record.path) {
                file.merge(record.access_count, lifetime);
                continue;
            }
            if let Some(file) = self.requested.get_mut(&record.path) {
                file.merge(record.access_count, lifetime);
                continue;
            }
            if let Some(f) = self.in_flight.as_mut() {
                if !f.cancelled && f.file.path == record.path {
                    f.file.merge(record.access_count, lifetime);
                    continue;
                }
            }

            self.requested.insert(
                record.path.clone(),
                CachedFile::requested(
                    record.path.clone(),
                    record.size,
                    record.access_count,
                    lifetime,
                    now,
                ),
            );
        }
        self.wake = true;
    }

    /// Look `path` up, consuming one reservation wherever it is found.
    pub(crate) fn try_get(&mut self, path: &CanonicalPath) -> Lookup {
        if let Some(file) = self.ready.get_mut(path) {
            let content = file.content.clone();
            if file.dereference() {
                if let Some(file) = self.ready.remove(path) {
                    self.schedule_release(file);
                }
            }
            return match content {
                Some(c) => Lookup::Hit(c),
                None => Lookup::Miss,
            };
        }

        // Asked for before the load finished.  We can't serve it, but the caller will read it directly, so the
        // reservation it was going to use is spent.
        if let Some(file) = self.requested.get_mut(path) {
            if file.dereference() {
                if let Some(file) = self.requested.remove(path) {
                    self.schedule_release(file);
                }
            }
            return Lookup::Pending;
        }

        if let Some(f) = self.in_flight.as_mut() {
            if !f.cancelled && f.file.ref_count > 0 && f.file.path == *path {
                // Hitting zero here makes finish_load discard the bytes.
                f.file.dereference();
                return Lookup::Pending;
            }
        }

        trace!(path = %path, "cache miss");
        Lookup::Miss
    }

    /// Remove the named files, or everything if `usage` is `None`.
    pub(crate) fn flush(&mut self, usage: Option<&UsageSnapshot>) {
        match usage {
            Some(usage) => {
                for record in usage.files.iter() {
                    if let Some(file) = self.ready.remove(&record.path) {
                        self.schedule_release(file);
                        continue;
                    }
                    if let Some(file) = self.requested.remove(&record.path) {
                        self.schedule_release(file);
                        continue;
                    }
                    if let Some(f) = self.in_flight.as_mut() {
                        if f.file.path == record.path {
                            f.cancelled = true;
                        }
                    }
                }
            }
            None => {
                let ready = self.ready.drain();
                let requested = self.requested.drain();
                self.pending_release.extend(ready);
                self.pending_release.extend(requested);
                if let Some(f) = self.in_flight.as_mut() {
                    f.cancelled = true;
                }
            }
        }
        self.wake = true;
    }

    /// Take the next request off the queue if it fits under `memory_limit`, returning the path to read.
    ///
    /// Stops at the first request that doesn't fit rather than looking past it, so the queue is always serviced in
    /// feed order.
    pub(crate) fn begin_load(&mut self, memory_limit: u64) -> Option<CanonicalPath> {
        debug_assert!(self.in_flight.is_none());

        loop {
            let size = self.requested.front()?.1.size;
            if size >= memory_limit {
                if let Some(file) = self.requested.pop_front() {
                    warn!(path = %file.path, size, memory_limit, "dropping request larger than the memory limit");
                }
                continue;
            }
            if size.saturating_add(self.used_memory) >= memory_limit {
                trace!(size, used_memory = self.used_memory, "memory limit reached, deferring admission");
                return None;
            }

            let file = self.requested.pop_front()?;
            // Feeds merge into ready entries, so a path is never both queued and ready.
            debug_assert!(!self.ready.contains_key(&file.path));

            let path = file.path.clone();
            self.in_flight = Some(InFlight {
                file,
                cancelled: false,
            });
            return Some(path);
        }
    }

    /// How many more bytes fit under `memory_limit`.  A load admitted by [CacheState::begin_load] must not read more
    /// than this.
    pub(crate) fn remaining_memory(&self, memory_limit: u64) -> u64 {
        memory_limit.saturating_sub(self.used_memory)
    }

    /// Publish the result of the read started by [CacheState::begin_load].
    ///
    /// `None` means the read failed; the request is dropped and never retried.
    pub(crate) fn finish_load(&mut self, content: Option<Vec<u8>>, memory_limit: u64, now: Instant) {
        let InFlight {
            mut file,
            cancelled,
        } = match self.in_flight.take() {
            Some(x) => x,
            None => return,
        };

        let content = match content {
            Some(c) => c,
            None => return,
        };
        if cancelled || file.ref_count == 0 {
            debug!(path = %file.path, "discarding load nobody is waiting for");
            return;
        }
        let len = content.len() as u64;
        if self.used_memory.saturating_add(len) > memory_limit {
            debug!(
                path = %file.path,
                declared = file.size,
                actual = len,
                "file grew past the memory limit, discarding"
            );
            return;
        }

        trace!(
            path = %file.path,
            bytes = len,
            waited = ?now.saturating_duration_since(file.requested_at),
            "file ready"
        );
        file.content = Some(Arc::from(content));
        file.loaded_at = Some(now);
        self.used_memory += len;
        self.ready.insert(file.path.clone(), file);
    }

    /// Move up to `budget` expired ready entries to pending-release, continuing from where the last sweep stopped.
    pub(crate) fn sweep_expired(&mut self, budget: usize, now: Instant) {
        let expired = self.ready.sweep(budget, |_, file| file.is_expired(now));
        for file in expired {
            trace!(path = %file.path, "expired");
            self.pending_release.push(file);
        }
    }

    /// Give back the memory held by everything pending release.
    pub(crate) fn release_pending(&mut self) {
        for mut file in self.pending_release.drain(..) {
            let freed = file.release();
            debug_assert!(freed <= self.used_memory);
            self.used_memory -= freed;
        }
    }
}
