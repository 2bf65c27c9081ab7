//! File change notifications

use crate::path::FsPath;

/// What happened to the file named by a `FileEvent`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
    /// Some events were dropped. The receiver should rescan.
    Overflow,
}

/// A change to a specific file in a file system
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileEvent {
    /// The changed file, or `None` if the path is unknown and the change
    /// may or may not have happened
    pub file: Option<FsPath>,
    pub kind: FileEventKind,
}

impl FileEvent {
    pub fn new(file: FsPath, kind: FileEventKind) -> Self {
        Self {
            file: Some(file),
            kind,
        }
    }

    /// An event whose path is unknown because notifications were lost
    pub fn overflow() -> Self {
        Self {
            file: None,
            kind: FileEventKind::Overflow,
        }
    }

    /// True when the event does not identify the file it refers to
    pub fn is_uncertain(&self) -> bool {
        self.file.is_none()
    }
}
