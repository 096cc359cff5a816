//! A [Vfs] that puts the [StreamingCache] in front of another [Vfs].
//!
//! This is how the rest of an application is expected to read assets: hits come out of memory, and anything else
//! (pending, missed, or the cache not running) is read from the backing vfs directly.  Direct reads are also where usage
//! gets recorded, so that the next session can feed them.
use std::io::{Cursor, Error as IoError, Read};
use std::sync::Arc;

use tracing::debug;

use crate::*;

pub struct ReadThroughVfs<VfsImpl: Vfs> {
    cache: Arc<StreamingCache<VfsImpl>>,
    recorder: Option<Arc<UsageRecorder>>,
}

impl<VfsImpl: Vfs> ReadThroughVfs<VfsImpl> {
    pub fn new(cache: Arc<StreamingCache<VfsImpl>>) -> ReadThroughVfs<VfsImpl> {
        ReadThroughVfs {
            cache,
            recorder: None,
        }
    }

    /// Record every direct read into `recorder`.
    pub fn with_recorder(mut self, recorder: Arc<UsageRecorder>) -> ReadThroughVfs<VfsImpl> {
        self.recorder = Some(recorder);
        self
    }

    pub fn cache(&self) -> &Arc<StreamingCache<VfsImpl>> {
        &self.cache
    }
}

/// Either prefetched bytes or a reader from the backing vfs.
pub enum CachedReader<R> {
    Cached(Cursor<Arc<[u8]>>),
    Direct(R),
}

impl<R: Read> Read for CachedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            CachedReader::Cached(c) => c.read(buf),
            CachedReader::Direct(r) => r.read(buf),
        }
    }
}

impl<R: VfsReader> VfsReader for CachedReader<R> {
    fn get_size(&self) -> Result<u64, IoError> {
        match self {
            CachedReader::Cached(c) => Ok(c.get_ref().len() as u64),
            CachedReader::Direct(r) => r.get_size(),
        }
    }
}

impl<VfsImpl: Vfs> Vfs for ReadThroughVfs<VfsImpl> {
    type Reader = CachedReader<VfsImpl::Reader>;

    fn open(&self, key: &str) -> Result<Self::Reader, IoError> {
        match self.cache.try_get(key) {
            Ok(Lookup::Hit(bytes)) => return Ok(CachedReader::Cached(Cursor::new(bytes))),
            Ok(_) => {}
            Err(e) => debug!(path = key, error = %e, "reading around the streaming cache"),
        }

        let reader = self.cache.vfs().open(key)?;
        if let Some(recorder) = self.recorder.as_ref() {
            match reader.get_size() {
                Ok(size) => recorder.register_file(key, size),
                Err(e) => debug!(path = key, error = %e, "unable to size file for usage data"),
            }
        }
        Ok(CachedReader::Direct(reader))
    }
}
