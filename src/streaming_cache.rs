//! The [StreamingCache] prefetches files from a [Vfs] in the background, ahead of when they're needed.
//!
//! A producer calls [StreamingCache::feed] with a [UsageSnapshot], usually one recorded during an earlier run, to say
//! "these files will be wanted soon, this many times each".  The worker thread loads them in feed order as long as they
//! fit under the memory limit.  Consumers call [StreamingCache::try_get]; every lookup uses up one of the reservations
//! made by the feed, and once they're all used, or the lifetime passes, the bytes are let go.
//!
//! Feeding is only a hint.  [Lookup::Pending] and [Lookup::Miss] both mean "read it yourself", and nothing about the
//! cache's contents is ever reported as an error.  The only errors are lifecycle misuse: using the cache before
//! [StreamingCache::init] or after [StreamingCache::shutdown].
use std::io::Cursor;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error};

use crate::cache_state::{CacheState, Lifecycle};
use crate::worker::{self, Shared};
use crate::*;

#[derive(Clone, Debug, derive_builder::Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct StreamingCacheConfig {
    /// Maximum bytes held by prefetched files.  Fixed for the life of the cache.
    #[builder(default = "2 * 1024 * 1024 * 1024")]
    pub memory_limit: u64,
    /// Longest the worker sleeps between passes when nobody wakes it.
    #[builder(default = "Duration::from_millis(250)")]
    pub poll_interval: Duration,
    /// Most ready entries checked for expiry per pass.
    #[builder(default = "250")]
    pub sweep_budget: usize,
}

impl StreamingCacheConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.memory_limit == Some(0) {
            return Err("memory_limit must be greater than zero".into());
        }
        if self.sweep_budget == Some(0) {
            return Err("sweep_budget must be greater than zero".into());
        }
        Ok(())
    }
}

impl Default for StreamingCacheConfig {
    fn default() -> Self {
        StreamingCacheConfig {
            memory_limit: 2 * 1024 * 1024 * 1024,
            poll_interval: Duration::from_millis(250),
            sweep_budget: 250,
        }
    }
}

/// Result of [StreamingCache::try_get].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// The file's bytes.  These stay valid even after the cache lets go of them.
    Hit(Arc<[u8]>),
    /// The file was fed but hasn't been loaded yet.
    Pending,
    /// The cache knows nothing about the file.
    Miss,
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    /// A fresh reader over the bytes of a hit.
    pub fn into_reader(self) -> Option<Cursor<Arc<[u8]>>> {
        match self {
            Lookup::Hit(bytes) => Some(Cursor::new(bytes)),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Bytes of loaded files not yet given back.
    pub used_memory: u64,
    pub ready_files: usize,
    /// Requests waiting to be loaded, including one being read right now.
    pub queued_requests: usize,
    /// Entries removed from the cache whose memory the worker hasn't reclaimed yet.
    pub pending_release: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum StreamingError {
    #[error("the streaming cache is not running")]
    NotRunning,
    #[error("the streaming cache is already running")]
    AlreadyRunning,
    #[error("unable to start the streaming worker: {0}")]
    Spawn(std::io::Error),
    #[error("the streaming worker panicked")]
    WorkerPanicked,
}

pub struct StreamingCache<VfsImpl: Vfs> {
    shared: Arc<Shared<VfsImpl>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<VfsImpl: Vfs> StreamingCache<VfsImpl> {
    /// Build a cache over `vfs`.  Nothing happens until [StreamingCache::init].
    pub fn new(vfs: VfsImpl, config: StreamingCacheConfig) -> StreamingCache<VfsImpl> {
        StreamingCache {
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState::new()),
                signal: Condvar::new(),
                vfs,
                config,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn vfs(&self) -> &VfsImpl {
        &self.shared.vfs
    }

    pub fn config(&self) -> &StreamingCacheConfig {
        &self.shared.config
    }

    /// Lock the state, checking the cache is usable.
    fn running_state(&self) -> Result<MutexGuard<'_, CacheState>, StreamingError> {
        let state = self.shared.state.lock();
        if state.lifecycle != Lifecycle::Running {
            return Err(StreamingError::NotRunning);
        }
        Ok(state)
    }

    /// Start the worker thread.
    pub fn init(&self) -> Result<(), StreamingError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(StreamingError::AlreadyRunning);
        }

        self.shared.state.lock().lifecycle = Lifecycle::Running;
        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("asset-streaming".into())
            .spawn(move || worker::run(shared));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.state.lock().lifecycle = Lifecycle::Stopped;
                Err(StreamingError::Spawn(e))
            }
        }
    }

    /// Stop the worker, wait for it to exit, and give back all cached memory.
    pub fn shutdown(&self) -> Result<(), StreamingError> {
        // Held until the worker is gone, so a concurrent init can't start a second one early.
        let mut worker = self.worker.lock();
        let handle = worker.take().ok_or(StreamingError::NotRunning)?;

        self.shared.state.lock().lifecycle = Lifecycle::Stopped;
        self.shared.signal.notify_one();
        let joined = handle.join();

        {
            let mut state = self.shared.state.lock();
            state.flush(None);
            state.release_pending();
            state.wake = false;
        }

        match joined {
            Ok(()) => {
                debug!("streaming cache shut down");
                Ok(())
            }
            Err(_) => {
                error!("streaming worker panicked");
                Err(StreamingError::WorkerPanicked)
            }
        }
    }

    /// Queue every file in `usage` for prefetching, reserving each for as many lookups as it was accessed.  Entries
    /// live at most `lifetime` after they finish loading.
    pub fn feed(&self, usage: &UsageSnapshot, lifetime: Duration) -> Result<(), StreamingError> {
        let mut state = self.running_state()?;
        state.feed(usage, lifetime, Instant::now());
        self.shared.notify_if_woken(&state);
        Ok(())
    }

    /// Look for a prefetched file.
    pub fn try_get(&self, path: &str) -> Result<Lookup, StreamingError> {
        let path = CanonicalPath::new(path);
        let mut state = self.running_state()?;
        let ret = state.try_get(&path);
        self.shared.notify_if_woken(&state);
        Ok(ret)
    }

    /// Drop the files named in `usage`, or everything if `None`.
    pub fn flush(&self, usage: Option<&UsageSnapshot>) -> Result<(), StreamingError> {
        let mut state = self.running_state()?;
        state.flush(usage);
        self.shared.notify_if_woken(&state);
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        self.shared.state.lock().stats()
    }
}

impl<VfsImpl: Vfs> Drop for StreamingCache<VfsImpl> {
    fn drop(&mut self) {
        if self.worker.get_mut().is_some() {
            let _ = self.shutdown();
        }
    }
}
