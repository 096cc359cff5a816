//! A prefetching cache for read-only asset files, warmed from recorded usage.
//!
//! Games and similar content-heavy programs read the same large set of textures, models and definitions on every start,
//! usually in roughly the same order.  This crate lets such a program remember which files it read and then, next time,
//! load them on a background thread before they are asked for:
//!
//! - A [UsageRecorder] notes each file as it is read, counting how many times and how big it was the first time.  The
//!   resulting [UsageSnapshot] can be saved and loaded as compressed, versioned data; anything wrong with that data just
//!   means there's nothing to warm the cache with.
//! - A [StreamingCache] is fed a snapshot.  Its single worker thread reads the files in feed order through a [Vfs], as
//!   long as they fit under a fixed memory limit.  Each file is reserved for as many lookups as it was accessed, and is
//!   let go when those run out or its lifetime passes, whichever is first.
//! - [StreamingCache::try_get] returns [Lookup::Hit] with the bytes, or [Lookup::Pending]/[Lookup::Miss], in which case
//!   the caller reads the file itself.  [ReadThroughVfs] wraps that pattern up as another [Vfs], recording direct reads
//!   as it goes.
//!
//! [EntryTable], the insertion-ordered table with a resumable sweep that backs the cache, is exposed because it's useful
//! in other contexts.
//!
//! To use this crate, implement [Vfs] for your storage (or use [FilesystemVfs]), then construct a [StreamingCache] with
//! your chosen [StreamingCacheConfig].
mod cache_state;
mod cached_file;
mod canonical_path;
mod entry_table;
mod filesystem_vfs;
mod read_through;
mod streaming_cache;
#[cfg(test)]
mod test_support;
mod traits;
mod usage;
mod worker;

pub use canonical_path::*;
pub use entry_table::*;
pub use filesystem_vfs::*;
pub use read_through::*;
pub use streaming_cache::*;
pub use traits::*;
pub use usage::*;
