//! Recording which files a session reads, so that the next session can feed them to the cache ahead of time.
//!
//! A [UsageRecorder] collects a [UsageSnapshot] as files are opened.  Snapshots are persisted as gzip-compressed,
//! versioned JSON.  Usage data is only ever an optimization: encoding, decoding, loading and saving all degrade to "no
//! data" instead of failing the caller, and the reason is logged.
use std::io::{Error as IoError, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::CanonicalPath;

type UsageHashMap<V> = std::collections::HashMap<CanonicalPath, V, ahash::RandomState>;

/// Bumped whenever the persisted layout changes; anything else is rejected on decode.
pub const USAGE_FORMAT_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUsageRecord {
    pub path: CanonicalPath,
    /// Size at first sight.
    pub size: u64,
    pub access_count: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Distinct files, in the order they were first read.
    pub files: Vec<FileUsageRecord>,
    /// Sum of the sizes of the distinct files.
    pub total_bytes_in_files: u64,
    /// Reads of files which had already been read before.
    pub duplicate_accesses: u64,
    /// Bytes read again by duplicate accesses, counted with each file's first-seen size.
    pub duplicate_access_bytes: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("unable to serialize usage data: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("usage data i/o failed: {0}")]
    Io(#[from] IoError),
    #[error("unsupported usage data version {0}")]
    UnsupportedVersion(u32),
    #[error("usage data lists {0} more than once")]
    DuplicatePath(CanonicalPath),
    #[error("usage data could not be encoded")]
    Encode,
}

#[derive(Serialize)]
struct EncodedSnapshot<'a> {
    version: u32,
    snapshot: &'a UsageSnapshot,
}

#[derive(Deserialize)]
struct DecodedSnapshot {
    version: u32,
    snapshot: UsageSnapshot,
}

impl UsageSnapshot {
    /// Total bytes read during the session, including re-reads.
    pub fn bytes_processed(&self) -> u64 {
        self.total_bytes_in_files + self.duplicate_access_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn try_encode(&self) -> Result<Vec<u8>, UsageError> {
        let mut encoder = GzEncoder::new(vec![], Compression::default());
        serde_json::to_writer(
            &mut encoder,
            &EncodedSnapshot {
                version: USAGE_FORMAT_VERSION,
                snapshot: self,
            },
        )?;
        encoder.flush()?;
        Ok(encoder.finish()?)
    }

    fn try_decode(bytes: &[u8]) -> Result<UsageSnapshot, UsageError> {
        // Decompress fully first, so that a bad trailer is caught even if the JSON happens to parse.
        let mut json = vec![];
        GzDecoder::new(bytes).read_to_end(&mut json)?;
        let decoded: DecodedSnapshot = serde_json::from_slice(&json)?;
        if decoded.version != USAGE_FORMAT_VERSION {
            return Err(UsageError::UnsupportedVersion(decoded.version));
        }

        let mut seen = UsageHashMap::default();
        for f in decoded.snapshot.files.iter() {
            if seen.insert(f.path.clone(), ()).is_some() {
                return Err(UsageError::DuplicatePath(f.path.clone()));
            }
        }
        Ok(decoded.snapshot)
    }

    /// Compress and serialize.  Returns `None` if that fails for any reason.
    pub fn encode(&self) -> Option<Vec<u8>> {
        match self.try_encode() {
            Ok(x) => Some(x),
            Err(e) => {
                warn!(error = %e, "unable to encode usage data");
                None
            }
        }
    }

    /// Inverse of [UsageSnapshot::encode].  Corrupt, truncated or foreign input gives `None`.
    pub fn decode(bytes: &[u8]) -> Option<UsageSnapshot> {
        match Self::try_decode(bytes) {
            Ok(x) => Some(x),
            Err(e) => {
                warn!(error = %e, "discarding unreadable usage data");
                None
            }
        }
    }

    /// Encode and write to `path`, replacing whatever is there.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), UsageError> {
        let encoded = self.encode().ok_or(UsageError::Encode)?;
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, encoded)?;
        debug!(path = %path.display(), files = self.files.len(), "saved usage data");
        Ok(())
    }

    /// Read and decode `path`.  A missing file is the normal first-run case and gives `None` quietly.
    pub fn load(path: impl AsRef<Path>) -> Option<UsageSnapshot> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no usage data");
                return None;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unable to read usage data");
                return None;
            }
        };
        Self::decode(&bytes)
    }
}

#[derive(Default)]
struct RecorderState {
    /// Points at the record for the path in `snapshot.files`.
    index: UsageHashMap<usize>,
    snapshot: UsageSnapshot,
}

/// Thread-safe collector of per-file read statistics.
#[derive(Default)]
pub struct UsageRecorder {
    state: Mutex<RecorderState>,
}

impl UsageRecorder {
    pub fn new() -> UsageRecorder {
        Default::default()
    }

    /// Continue recording on top of an existing snapshot, for example one loaded from a previous session.
    pub fn from_snapshot(snapshot: UsageSnapshot) -> UsageRecorder {
        let index = snapshot
            .files
            .iter()
            .enumerate()
            .map(|(i, f)| (f.path.clone(), i))
            .collect();
        UsageRecorder {
            state: Mutex::new(RecorderState { index, snapshot }),
        }
    }

    /// Note that `path` was read and was `size` bytes long.
    ///
    /// Only the first read of a path contributes its size to the distinct total; later reads count as duplicates and
    /// are charged the size recorded the first time, even if `size` differs now.
    pub fn register_file(&self, path: &str, size: u64) {
        let path = CanonicalPath::new(path);
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(&ind) = state.index.get(&path) {
            let record = &mut state.snapshot.files[ind];
            record.access_count = record.access_count.saturating_add(1);
            state.snapshot.duplicate_accesses += 1;
            state.snapshot.duplicate_access_bytes += record.size;
            return;
        }

        state.index.insert(path.clone(), state.snapshot.files.len());
        state.snapshot.files.push(FileUsageRecord {
            path,
            size,
            access_count: 1,
        });
        state.snapshot.total_bytes_in_files += size;
    }

    /// A copy of everything recorded so far.
    pub fn snapshot(&self) -> UsageSnapshot {
        self.state.lock().snapshot.clone()
    }

    pub fn files(&self) -> Vec<FileUsageRecord> {
        self.state.lock().snapshot.files.clone()
    }

    pub fn bytes_processed(&self) -> u64 {
        self.state.lock().snapshot.bytes_processed()
    }

    /// Forget everything.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.index.clear();
        state.snapshot = Default::default();
    }

    pub fn encode(&self) -> Option<Vec<u8>> {
        self.snapshot().encode()
    }

    pub fn decode(bytes: &[u8]) -> Option<UsageRecorder> {
        UsageSnapshot::decode(bytes).map(UsageRecorder::from_snapshot)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), UsageError> {
        self.snapshot().save(path)
    }

    pub fn load(path: impl AsRef<Path>) -> Option<UsageRecorder> {
        UsageSnapshot::load(path).map(UsageRecorder::from_snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn sample() -> UsageRecorder {
        let recorder = UsageRecorder::new();
        recorder.register_file("Textures/Rock.dds", 100);
        recorder.register_file("models/ship.mwm", 250);
        recorder.register_file("textures\\rock.DDS", 999);
        recorder
    }

    #[test]
    fn test_register_counts_first_size() {
        let snapshot = sample().snapshot();
        assert_eq!(
            snapshot.files,
            vec![
                FileUsageRecord {
                    path: "textures/rock.dds".into(),
                    size: 100,
                    access_count: 2
                },
                FileUsageRecord {
                    path: "models/ship.mwm".into(),
                    size: 250,
                    access_count: 1
                },
            ]
        );
        assert_eq!(snapshot.total_bytes_in_files, 350);
        assert_eq!(snapshot.duplicate_accesses, 1);
        assert_eq!(snapshot.duplicate_access_bytes, 100);
        assert_eq!(snapshot.bytes_processed(), 450);
    }

    #[test]
    fn test_clear() {
        let recorder = sample();
        recorder.clear();
        assert_eq!(recorder.snapshot(), UsageSnapshot::default());
        recorder.register_file("textures/rock.dds", 7);
        assert_eq!(recorder.files()[0].access_count, 1);
        assert_eq!(recorder.bytes_processed(), 7);
    }

    #[test]
    fn test_decoded_recorder_keeps_counting() {
        let recorder = UsageRecorder::decode(&sample().encode().unwrap()).unwrap();
        recorder.register_file("TEXTURES/ROCK.DDS", 1);
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.files[0].access_count, 3);
        assert_eq!(snapshot.duplicate_access_bytes, 200);
        assert_eq!(snapshot.files.len(), 2);
    }

    #[test]
    fn test_truncated_input() {
        let encoded = sample().encode().unwrap();
        for len in 0..encoded.len() {
            assert!(
                UsageSnapshot::decode(&encoded[..len]).is_none(),
                "prefix of length {} decoded",
                len
            );
        }
    }

    #[test]
    fn test_corrupt_input() {
        assert!(UsageSnapshot::decode(b"definitely not gzip").is_none());

        let mut encoded = sample().encode().unwrap();
        let mid = encoded.len() / 2;
        encoded[mid] ^= 0xff;
        assert!(UsageSnapshot::decode(&encoded).is_none());

        // Valid gzip, but not our JSON.
        let mut enc = GzEncoder::new(vec![], Compression::default());
        enc.write_all(b"{\"files\": 3}").unwrap();
        assert!(UsageSnapshot::decode(&enc.finish().unwrap()).is_none());
    }

    #[test]
    fn test_version_mismatch() {
        let snapshot = sample().snapshot();
        let mut enc = GzEncoder::new(vec![], Compression::default());
        serde_json::to_writer(
            &mut enc,
            &EncodedSnapshot {
                version: USAGE_FORMAT_VERSION + 1,
                snapshot: &snapshot,
            },
        )
        .unwrap();
        assert!(UsageSnapshot::decode(&enc.finish().unwrap()).is_none());
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let mut snapshot = sample().snapshot();
        let mut dup = snapshot.files[0].clone();
        dup.path = "TEXTURES/rock.dds".into();
        snapshot.files.push(dup);
        assert!(UsageSnapshot::decode(&snapshot.encode().unwrap()).is_none());
    }

    #[test]
    fn test_save_and_load() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = tmp_dir.path().join("stats").join("usage.gz");

        assert!(UsageRecorder::load(&path).is_none());

        let recorder = sample();
        recorder.save(&path).unwrap();
        let loaded = UsageRecorder::load(&path).unwrap();
        assert_eq!(loaded.snapshot(), recorder.snapshot());

        std::fs::write(&path, b"garbage").unwrap();
        assert!(UsageSnapshot::load(&path).is_none());
    }

    // Property tests against a straightforward model: the first size wins, and duplicates are charged with it.
    proptest! {
        #[test]
        fn test_register_against_model(
            calls in prop::collection::vec((0..10usize, 0..10_000u64), 0..200)
        ) {
            let recorder = UsageRecorder::new();
            let mut first_sizes: Vec<Option<u64>> = vec![None; 10];
            let mut counts = vec![0u32; 10];
            let mut dup_accesses = 0u64;
            let mut dup_bytes = 0u64;

            for (file, size) in calls {
                recorder.register_file(&format!("Dir/File{}.dat", file), size);
                counts[file] += 1;
                match first_sizes[file] {
                    Some(first) => {
                        dup_accesses += 1;
                        dup_bytes += first;
                    }
                    None => first_sizes[file] = Some(size),
                }
            }

            let snapshot = recorder.snapshot();
            prop_assert_eq!(snapshot.total_bytes_in_files, first_sizes.iter().flatten().sum::<u64>());
            prop_assert_eq!(snapshot.duplicate_accesses, dup_accesses);
            prop_assert_eq!(snapshot.duplicate_access_bytes, dup_bytes);
            for record in snapshot.files.iter() {
                let ind = (0..10)
                    .find(|i| record.path == CanonicalPath::new(&format!("dir/file{}.dat", i)))
                    .unwrap();
                prop_assert_eq!(Some(record.size), first_sizes[ind]);
                prop_assert_eq!(record.access_count, counts[ind]);
            }
        }

        #[test]
        fn test_encode_decode_preserves_records(
            calls in prop::collection::vec(("[a-z]{1,8}(/[a-z]{1,8}){0,2}\\.dat", 0..1_000_000u64), 1..50)
        ) {
            let recorder = UsageRecorder::new();
            for (path, size) in calls.iter() {
                recorder.register_file(path, *size);
            }
            let snapshot = recorder.snapshot();
            let decoded = UsageSnapshot::decode(&snapshot.encode().unwrap());
            prop_assert_eq!(decoded, Some(snapshot));
        }
    }
}
