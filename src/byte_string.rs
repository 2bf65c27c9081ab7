//! Owned byte strings for raw, possibly non-UTF-8 file system data
//!
//! Symbolic link targets are stored and returned as raw bytes so that
//! targets which are not valid UTF-8 survive a round trip unchanged.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};

/// Immutable owned byte sequence
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteString(Vec<u8>);

impl ByteString {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `byte` occurs anywhere in the string
    pub fn contains(&self, byte: u8) -> bool {
        self.0.contains(&byte)
    }

    pub fn first(&self) -> Option<u8> {
        self.0.first().copied()
    }

    pub fn last(&self) -> Option<u8> {
        self.0.last().copied()
    }

    /// Index of the last byte, `None` for an empty string
    pub fn last_index(&self) -> Option<usize> {
        self.0.len().checked_sub(1)
    }

    /// Convert from an OS string. Lossless on Unix, UTF-8 (lossy) elsewhere.
    pub fn from_os_str(value: &OsStr) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::ffi::OsStrExt;
            Self(value.as_bytes().to_vec())
        }
        #[cfg(not(unix))]
        {
            Self(value.to_string_lossy().into_owned().into_bytes())
        }
    }

    /// Convert into an OS string. Lossless on Unix, UTF-8 (lossy) elsewhere.
    pub fn to_os_string(&self) -> OsString {
        #[cfg(unix)]
        {
            use std::os::unix::ffi::OsStringExt;
            OsString::from_vec(self.0.clone())
        }
        #[cfg(not(unix))]
        {
            OsString::from(String::from_utf8_lossy(&self.0).into_owned())
        }
    }

    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(self.to_os_string())
    }

    pub fn from_path(path: &Path) -> Self {
        Self::from_os_str(path.as_os_str())
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for ByteString {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for ByteString {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl AsRef<[u8]> for ByteString {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteString({:?})", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}
