//! The streaming worker: a single thread which loads queued requests under the memory limit, then expires and releases
//! entries.
//!
//! Each iteration waits for the poll interval (or a wake), then runs three passes: admission, expiry sweep, release.  The
//! lock is never held across a file read.
use std::convert::TryFrom;
use std::io::{Error, ErrorKind, Read};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::cache_state::{CacheState, Lifecycle};
use crate::*;

/// State shared between the [StreamingCache] handle and its worker thread.
pub(crate) struct Shared<VfsImpl: Vfs> {
    pub(crate) state: Mutex<CacheState>,
    pub(crate) signal: Condvar,
    pub(crate) vfs: VfsImpl,
    pub(crate) config: StreamingCacheConfig,
}

impl<VfsImpl: Vfs> Shared<VfsImpl> {
    /// Wake the worker early if the last state change asked for it.
    pub(crate) fn notify_if_woken(&self, state: &CacheState) {
        if state.wake {
            self.signal.notify_one();
        }
    }
}

/// Read a whole file through the vfs, failing with [ErrorKind::InvalidData] rather than reading past `budget` bytes.
fn read_file<VfsImpl: Vfs>(
    vfs: &VfsImpl,
    path: &CanonicalPath,
    budget: u64,
) -> std::io::Result<Vec<u8>> {
    let reader = vfs.open(path.as_str())?;
    let cap = budget.saturating_add(1);
    let size = reader.get_size()?.min(cap);
    let mut dest = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
    reader.take(cap).read_to_end(&mut dest)?;
    if dest.len() as u64 > budget {
        return Err(Error::new(
            ErrorKind::InvalidData,
            "file is larger than the remaining memory budget",
        ));
    }
    Ok(dest)
}

/// Load queued requests in order until the queue is empty or the next one doesn't fit.
fn admit_requests<VfsImpl: Vfs>(shared: &Shared<VfsImpl>) {
    let limit = shared.config.memory_limit;
    loop {
        let (path, budget) = {
            let mut state = shared.state.lock();
            if state.lifecycle != Lifecycle::Running {
                return;
            }
            match state.begin_load(limit) {
                Some(p) => (p, state.remaining_memory(limit)),
                None => return,
            }
        };

        let content = match read_file(&shared.vfs, &path, budget) {
            Ok(c) => Some(c),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path, "prefetch target not found");
                None
            }
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                debug!(path = %path, budget, error = %e, "prefetch target grew past the memory limit");
                None
            }
            Err(e) => {
                warn!(path = %path, error = %e, "prefetch read failed");
                None
            }
        };

        shared
            .state
            .lock()
            .finish_load(content, limit, Instant::now());
    }
}

pub(crate) fn run<VfsImpl: Vfs>(shared: Arc<Shared<VfsImpl>>) {
    debug!("streaming worker started");

    loop {
        {
            let mut state = shared.state.lock();
            if !state.wake && state.lifecycle == Lifecycle::Running {
                shared
                    .signal
                    .wait_for(&mut state, shared.config.poll_interval);
            }
            state.wake = false;
            if state.lifecycle != Lifecycle::Running {
                break;
            }
        }

        admit_requests(&shared);

        let mut state = shared.state.lock();
        state.sweep_expired(shared.config.sweep_budget, Instant::now());
        state.release_pending();
        trace!(stats = ?state.stats(), "streaming pass done");
    }

    debug!("streaming worker stopped");
}
