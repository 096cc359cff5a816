//! Helpers shared by the tests.
use std::collections::HashMap;
use std::io::{Cursor, Error as IoError};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::*;

/// A VFS wrapping a `HashMap` for testing, which also counts how often each key was opened.
#[derive(Default)]
pub(crate) struct HashMapVfs {
    files: Mutex<HashMap<String, Vec<u8>>>,
    opens: Mutex<HashMap<String, usize>>,
}

impl Vfs for Arc<HashMapVfs> {
    type Reader = Cursor<Vec<u8>>;

    fn open(&self, key: &str) -> Result<Self::Reader, IoError> {
        *self.opens.lock().entry(key.to_string()).or_default() += 1;
        let ret = self
            .files
            .lock()
            .get(key)
            .ok_or_else(|| IoError::new(std::io::ErrorKind::NotFound, "Entry not found".to_string()))?
            .clone();
        Ok(Cursor::new(ret))
    }
}

impl VfsReader for Cursor<Vec<u8>> {
    fn get_size(&self) -> Result<u64, IoError> {
        Ok(self.get_ref().len() as u64)
    }
}

impl HashMapVfs {
    pub(crate) fn new() -> HashMapVfs {
        Default::default()
    }

    pub(crate) fn insert(&self, key: &str, value: Vec<u8>) -> Option<Vec<u8>> {
        self.files.lock().insert(key.to_string(), value)
    }

    pub(crate) fn open_count(&self, key: &str) -> usize {
        self.opens.lock().get(key).copied().unwrap_or(0)
    }
}
