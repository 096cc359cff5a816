use std::fs::File;
use std::io::*;
use std::path::{Path, PathBuf};

use crate::*;

/// A VFS which serves loose files under a given root directory.
///
/// This handles the rather tricky path cases around Windows and Linux differences, and makes it so that you can and
/// should use keys like `/b/c`; `\` is treated as a separator too, since that's what most asset manifests contain.
/// Additionally, it makes a best effort to disallow a user to use relative paths to escape the root directory, primarily
/// as a measure to detect bugs.
///
/// The cache looks files up by [CanonicalPath], which is lowercase.  On a case-sensitive filesystem the files under the
/// root should have lowercase names too, or prefetches of them will simply miss.
#[derive(Debug)]
pub struct FilesystemVfs {
    root_path: PathBuf,
}

fn conv_path(path: &str) -> Result<relative_path::RelativePathBuf> {
    relative_path::RelativePathBuf::from_path(path.replace('\\', "/"))
        .map_err(|_| Error::new(ErrorKind::Other, "Invalid path"))
}

impl FilesystemVfs {
    pub fn new(root_path: &Path) -> std::io::Result<FilesystemVfs> {
        if !root_path.is_dir() {
            return Err(Error::new(
                ErrorKind::NotFound,
                "vfs root is not a directory",
            ));
        }
        Ok(FilesystemVfs {
            root_path: root_path.to_path_buf(),
        })
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Run the file opening logic on the VFS, so that this can be reused for normal file access at the same time.
    pub fn open_file(&self, path: &str) -> std::io::Result<File> {
        // On Windows, canonicalize is currently very broken when relative path segments appear in the middle of a
        // path, and stdlib doesn't help us out. Go via `RelativePathBuf` to clean it up.
        let absolute = conv_path(path)?.to_logical_path(&self.root_path);
        if !absolute.starts_with(&self.root_path) {
            return Err(Error::new(
                ErrorKind::Other,
                "path is outside the vfs root directory",
            ));
        }
        File::open(absolute)
    }
}

impl Vfs for FilesystemVfs {
    type Reader = File;

    fn open(&self, key: &str) -> std::io::Result<File> {
        self.open_file(key)
    }
}

impl VfsReader for File {
    fn get_size(&self) -> Result<u64> {
        let meta = self.metadata()?;
        Ok(meta.len())
    }
}
