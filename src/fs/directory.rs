//! Directory streams

use async_trait::async_trait;
use std::ffi::OsString;
use std::io;

use super::metadata::FileType;

/// One entry yielded by a `DirectoryStream`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Entry name, relative to the directory being read
    pub name: OsString,
    /// Only filled in when the stream was opened with `ReadType`
    pub file_type: Option<FileType>,
}

impl DirectoryEntry {
    pub fn new(name: impl Into<OsString>) -> Self {
        Self {
            name: name.into(),
            file_type: None,
        }
    }

    pub fn with_file_type(mut self, file_type: FileType) -> Self {
        self.file_type = Some(file_type);
        self
    }
}

/// Scoped cursor over the entries of one directory
///
/// `.` and `..` are never returned. The stream is released when dropped.
#[async_trait]
pub trait DirectoryStream: Send {
    /// Next entry, or `None` once the directory is exhausted
    async fn read(&mut self) -> io::Result<Option<DirectoryEntry>>;
}
