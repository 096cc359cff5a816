//! Cache keys.
//!
//! Every path handed to the cache or the usage recorder goes through [CanonicalPath] first, so `Textures\Rock.DDS`,
//! `textures/rock.dds` and `textures/./rock.dds` all name the same entry.
use std::borrow::Borrow;
use std::fmt;

/// A case-insensitive, `/`-separated, normalized path used as the key for cached files and usage records.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CanonicalPath(String);

impl CanonicalPath {
    pub fn new(path: &str) -> CanonicalPath {
        let slashed = path.replace('\\', "/");
        let normalized = relative_path::RelativePath::new(&slashed).normalize();
        CanonicalPath(normalized.as_str().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CanonicalPath {
    fn from(path: &str) -> CanonicalPath {
        CanonicalPath::new(path)
    }
}

// Deserialized paths are canonicalized again, so hand-edited or older files can't smuggle in keys that lookups would
// never match.
impl From<String> for CanonicalPath {
    fn from(path: String) -> CanonicalPath {
        CanonicalPath::new(&path)
    }
}

impl From<CanonicalPath> for String {
    fn from(path: CanonicalPath) -> String {
        path.0
    }
}

impl Borrow<str> for CanonicalPath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CanonicalPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
