//! Option flags accepted by file system operations
//!
//! Options are passed as slices. They are unordered and duplicates are
//! harmless. Each operation validates its options here, before any I/O
//! happens, so a rejected combination never leaves a half-opened resource
//! behind.

use std::io;

use crate::error::{invalid_argument, not_opened_for};
use crate::path::FsPath;

/// Access checked by `check_access`. An empty set checks existence only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
    Execute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileMetadataOption {
    /// Describe a symbolic link itself rather than its target
    NoFollowLinks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileContentOption {
    Read,
    Write,
    Append,
    TruncateExisting,
    Create,
    CreateNew,
    /// Fail if the final path segment is a symbolic link
    NoFollowLinks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectoryStreamOption {
    /// Fill in `DirectoryEntry::file_type` for every entry
    ReadType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateFileOption {
    /// Create missing parent directories first
    CreateParents,
    /// Succeed if a directory already exists at the path
    AllowExisting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyFileOption {
    ReplaceExisting,
    /// Carry over permissions and modification time
    CopyAttributes,
    /// Copy or move a symbolic link itself rather than its target
    NoFollowLinks,
    /// Move with a single rename or fail; only valid for moves
    AtomicMove,
}

/// Default options of `open_sink` when none are given
pub const OPEN_SINK_OPTIONS_DEFAULT: &[FileContentOption] = &[
    FileContentOption::Write,
    FileContentOption::TruncateExisting,
    FileContentOption::Create,
];

/// Validated, normalized form of a `FileContentOption` set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentOpenMode {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub truncate: bool,
    pub create: bool,
    pub create_new: bool,
    pub follow_links: bool,
}

impl ContentOpenMode {
    /// Validate content options.
    ///
    /// With no access flag the content is opened for reading. Truncation and
    /// creation need write access, and appending cannot be combined with
    /// truncation.
    pub fn from_options(options: &[FileContentOption]) -> io::Result<Self> {
        let mut mode = Self {
            follow_links: true,
            ..Self::default()
        };
        for option in options {
            match option {
                FileContentOption::Read => mode.read = true,
                FileContentOption::Write => mode.write = true,
                FileContentOption::Append => mode.append = true,
                FileContentOption::TruncateExisting => mode.truncate = true,
                FileContentOption::Create => mode.create = true,
                FileContentOption::CreateNew => mode.create_new = true,
                FileContentOption::NoFollowLinks => mode.follow_links = false,
            }
        }
        if !mode.read && !mode.write && !mode.append {
            mode.read = true;
        }
        let writable = mode.write || mode.append;
        if mode.append && mode.truncate {
            return Err(invalid_argument(
                "Append cannot be combined with TruncateExisting",
            ));
        }
        if (mode.truncate || mode.create || mode.create_new) && !writable {
            return Err(invalid_argument(
                "TruncateExisting, Create and CreateNew require Write or Append",
            ));
        }
        Ok(mode)
    }

    pub fn is_writable(&self) -> bool {
        self.write || self.append
    }

    /// `PermissionDenied` unless the content was opened for reading
    pub fn ensure_readable(&self, path: &FsPath) -> io::Result<()> {
        if self.read {
            Ok(())
        } else {
            Err(not_opened_for(path, "reading"))
        }
    }

    /// `PermissionDenied` unless the content was opened with `Write` or `Append`
    pub fn ensure_writable(&self, path: &FsPath) -> io::Result<()> {
        if self.is_writable() {
            Ok(())
        } else {
            Err(not_opened_for(path, "writing"))
        }
    }
}

/// Reject options that would make a source writable
pub fn check_source_options(options: &[FileContentOption]) -> io::Result<()> {
    for forbidden in [FileContentOption::Write, FileContentOption::Append] {
        if options.contains(&forbidden) {
            return Err(invalid_argument(format!(
                "{:?} is not allowed when opening a source",
                forbidden
            )));
        }
    }
    Ok(())
}

/// Reject options that would make a sink readable or not writable
pub fn check_sink_options(options: &[FileContentOption]) -> io::Result<()> {
    if options.contains(&FileContentOption::Read) {
        return Err(invalid_argument("Read is not allowed when opening a sink"));
    }
    if !options.contains(&FileContentOption::Write) && !options.contains(&FileContentOption::Append)
    {
        return Err(invalid_argument("Missing Write or Append"));
    }
    Ok(())
}

/// What a create operation is about to create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateTarget {
    Directory,
    SymbolicLink,
}

/// Validated form of a `CreateFileOption` set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateMode {
    pub create_parents: bool,
    pub allow_existing: bool,
}

impl CreateMode {
    pub fn from_options(options: &[CreateFileOption], target: CreateTarget) -> io::Result<Self> {
        let mode = Self {
            create_parents: options.contains(&CreateFileOption::CreateParents),
            allow_existing: options.contains(&CreateFileOption::AllowExisting),
        };
        if mode.allow_existing && target != CreateTarget::Directory {
            return Err(invalid_argument(
                "AllowExisting only applies to directories",
            ));
        }
        Ok(mode)
    }
}

/// Validated form of a `CopyFileOption` set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyMode {
    pub replace_existing: bool,
    pub copy_attributes: bool,
    pub follow_links: bool,
    pub atomic_move: bool,
}

impl CopyMode {
    pub fn for_copy(options: &[CopyFileOption]) -> io::Result<Self> {
        if options.contains(&CopyFileOption::AtomicMove) {
            return Err(invalid_argument("AtomicMove is only valid for moves"));
        }
        Ok(Self::collect(options))
    }

    pub fn for_move(options: &[CopyFileOption]) -> io::Result<Self> {
        Ok(Self::collect(options))
    }

    fn collect(options: &[CopyFileOption]) -> Self {
        Self {
            replace_existing: options.contains(&CopyFileOption::ReplaceExisting),
            copy_attributes: options.contains(&CopyFileOption::CopyAttributes),
            follow_links: !options.contains(&CopyFileOption::NoFollowLinks),
            atomic_move: options.contains(&CopyFileOption::AtomicMove),
        }
    }
}

pub fn follows_links(options: &[FileMetadataOption]) -> bool {
    !options.contains(&FileMetadataOption::NoFollowLinks)
}

pub fn reads_type(options: &[DirectoryStreamOption]) -> bool {
    options.contains(&DirectoryStreamOption::ReadType)
}
