//! Scheme-qualified paths
//!
//! An `FsPath` names a location inside one file system namespace. The
//! scheme selects the namespace (`file`, `memory`, ...) and the path part is
//! interpreted by the file system registered for that scheme.

use std::ffi::OsStr;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Scheme of the local disk namespace
pub const FILE_SCHEME: &str = "file";
/// Scheme of the in-memory namespace
pub const MEMORY_SCHEME: &str = "memory";

/// Immutable, scheme-qualified path value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FsPath {
    scheme: Arc<str>,
    path: PathBuf,
}

impl FsPath {
    pub fn new(scheme: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            scheme: Arc::from(scheme),
            path: path.into(),
        }
    }

    /// Path on the local disk
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(FILE_SCHEME, path)
    }

    /// Path in an in-memory file system
    pub fn memory(path: impl Into<PathBuf>) -> Self {
        Self::new(MEMORY_SCHEME, path)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn as_path(&self) -> &Path {
        &self.path
    }

    pub fn is_absolute(&self) -> bool {
        self.path.has_root()
    }

    /// Compose a child onto this path, keeping the scheme.
    ///
    /// An absolute child replaces the base path entirely.
    pub fn resolve(&self, child: impl AsRef<Path>) -> FsPath {
        Self {
            scheme: Arc::clone(&self.scheme),
            path: self.path.join(child),
        }
    }

    /// Same scheme, different path
    pub fn with_path(&self, path: impl Into<PathBuf>) -> FsPath {
        Self {
            scheme: Arc::clone(&self.scheme),
            path: path.into(),
        }
    }

    pub fn parent(&self) -> Option<FsPath> {
        self.path.parent().map(|parent| self.with_path(parent))
    }

    pub fn file_name(&self) -> Option<&OsStr> {
        self.path.file_name()
    }
}

impl fmt::Display for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.path.display())
    }
}

impl FromStr for FsPath {
    type Err = io::Error;

    /// Parse `scheme://path`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, path) = s.split_once("://").ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Missing scheme in path: {}", s),
            )
        })?;
        let valid_scheme = scheme
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !valid_scheme {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid scheme: {}", scheme),
            ));
        }
        Ok(Self::new(scheme, path))
    }
}
