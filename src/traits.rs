//! The [Vfs] trait is responsible for converting canonical path keys to [Read] implementations.
//!
//! The cache never writes and never cares whether a file came from an archive or a loose directory: everything the
//! streaming worker prefetches goes through [Vfs::open].
use std::io::{Error, Read};

/// "open" a "file" for reading and return a [VfsReader] over it.
pub trait Vfs: Send + Sync + 'static {
    type Reader: VfsReader;

    /// Open a file.
    ///
    /// Missing files should be reported with [std::io::ErrorKind::NotFound]; the worker treats that as the expected
    /// case and doesn't log it loudly.
    fn open(&self, key: &str) -> Result<Self::Reader, Error>;
}

/// A reader returned from the VFS.
///
/// Readers should handle closing in their drop implementations.
pub trait VfsReader: Read + Send + Sync + 'static {
    /// Return the size of this object once read.
    ///
    /// Used as a capacity hint when prefetching and as the recorded size when tracking usage.
    fn get_size(&self) -> Result<u64, Error>;
}
