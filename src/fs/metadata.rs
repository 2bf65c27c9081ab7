//! File metadata and metadata views

use async_trait::async_trait;
use std::io;
use std::time::SystemTime;

/// Type of a file system entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    File,
    Directory,
    Symlink,
    /// Devices, sockets, FIFOs and anything else
    Other,
}

impl FileType {
    pub fn from_std(file_type: std::fs::FileType) -> Self {
        if file_type.is_symlink() {
            FileType::Symlink
        } else if file_type.is_dir() {
            FileType::Directory
        } else if file_type.is_file() {
            FileType::File
        } else {
            FileType::Other
        }
    }
}

/// Identity of the underlying file object, independent of the path used
/// to reach it. Two paths with equal keys denote the same file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileKey {
    pub device: u64,
    pub inode: u64,
}

/// Permission bits, in Unix mode layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePermissions {
    mode: u32,
}

impl FilePermissions {
    pub fn from_mode(mode: u32) -> Self {
        Self { mode: mode & 0o7777 }
    }

    #[cfg(unix)]
    pub fn from_std(perms: &std::fs::Permissions) -> Self {
        use std::os::unix::fs::PermissionsExt;
        Self::from_mode(perms.mode())
    }

    #[cfg(not(unix))]
    pub fn from_std(perms: &std::fs::Permissions) -> Self {
        Self::from_mode(if perms.readonly() { 0o444 } else { 0o666 })
    }

    /// Apply these bits to an existing `std::fs::Permissions`
    #[cfg(unix)]
    pub fn apply_to(&self, perms: &mut std::fs::Permissions) {
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(self.mode);
    }

    #[cfg(not(unix))]
    pub fn apply_to(&self, perms: &mut std::fs::Permissions) {
        perms.set_readonly(self.is_readonly());
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn is_readonly(&self) -> bool {
        self.mode & 0o222 == 0
    }
}

/// Metadata about a file or directory
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub file_type: FileType,
    /// Size in bytes (0 for directories on in-memory file systems)
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
    pub created: Option<SystemTime>,
    pub permissions: Option<FilePermissions>,
    pub file_key: Option<FileKey>,
    /// Number of hard links to the file
    pub link_count: Option<u64>,
}

impl FileMetadata {
    /// Create minimal metadata with just type and size
    pub fn new(file_type: FileType, size: u64) -> Self {
        Self {
            file_type,
            size,
            modified: None,
            accessed: None,
            created: None,
            permissions: None,
            file_key: None,
            link_count: None,
        }
    }

    /// Build from `std::fs::Metadata`
    pub fn from_std(meta: &std::fs::Metadata) -> Self {
        let mut metadata = Self::new(FileType::from_std(meta.file_type()), meta.len())
            .with_permissions(FilePermissions::from_std(&meta.permissions()));
        metadata.modified = meta.modified().ok();
        metadata.accessed = meta.accessed().ok();
        metadata.created = meta.created().ok();
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            metadata.file_key = Some(FileKey {
                device: meta.dev(),
                inode: meta.ino(),
            });
            metadata.link_count = Some(meta.nlink());
        }
        metadata
    }

    pub fn with_modified(mut self, modified: SystemTime) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn with_permissions(mut self, permissions: FilePermissions) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_file_key(mut self, file_key: FileKey) -> Self {
        self.file_key = Some(file_key);
        self
    }

    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type == FileType::Symlink
    }
}

/// Scoped handle for repeated metadata queries and updates on one file
///
/// Every `read_metadata` call observes the current state of the file, so
/// changes made through other handles or other processes are visible. The
/// handle is released when dropped.
#[async_trait]
pub trait FileMetadataView: Send + Sync {
    async fn read_metadata(&self) -> io::Result<FileMetadata>;

    async fn set_modified(&self, time: SystemTime) -> io::Result<()>;

    async fn set_permissions(&self, permissions: FilePermissions) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissions_readonly() {
        assert!(FilePermissions::from_mode(0o444).is_readonly());
        assert!(!FilePermissions::from_mode(0o644).is_readonly());
        assert_eq!(FilePermissions::from_mode(0o100644).mode(), 0o644);
    }

    #[test]
    fn test_metadata_builder() {
        let now = SystemTime::now();
        let meta = FileMetadata::new(FileType::File, 3)
            .with_modified(now)
            .with_permissions(FilePermissions::from_mode(0o600))
            .with_file_key(FileKey {
                device: 1,
                inode: 2,
            });
        assert!(meta.is_file());
        assert!(!meta.is_dir());
        assert_eq!(meta.modified, Some(now));
        assert_eq!(meta.permissions.map(|p| p.mode()), Some(0o600));
        assert_eq!(meta.file_key.map(|k| k.inode), Some(2));
    }

    #[test]
    fn test_from_std_metadata() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"hello").unwrap();
        let meta = FileMetadata::from_std(&std::fs::metadata(file.path()).unwrap());
        assert!(meta.is_file());
        assert_eq!(meta.size, 5);
        assert!(meta.modified.is_some());
        #[cfg(unix)]
        assert!(meta.file_key.is_some());
    }
}
