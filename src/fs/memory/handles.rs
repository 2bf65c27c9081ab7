//! Handles opened on the in-memory file system
//!
//! Every handle pins its inode for as long as it lives, so content stays
//! reachable after the last name is deleted. The pin is dropped with the
//! handle.

use async_trait::async_trait;
use std::ffi::OsString;
use std::io;
use std::time::SystemTime;
use tokio::sync::broadcast;

use super::tree::{lock, NodeKind, SharedTree};
use crate::error::unsupported;
use crate::event::{FileEvent, FileEventKind};
use crate::fs::content::FileContent;
use crate::fs::directory::{DirectoryEntry, DirectoryStream};
use crate::fs::metadata::{FileMetadata, FileMetadataView, FilePermissions};
use crate::fs::store::{FileStore, FileStoreMetadata};
use crate::options::ContentOpenMode;
use crate::path::FsPath;

/// Keeps one inode alive until dropped
pub(super) struct InodePin {
    tree: SharedTree,
    inode: u64,
}

impl InodePin {
    /// Caller must already hold the pin count increment for `inode`
    pub fn new(tree: SharedTree, inode: u64) -> Self {
        Self { tree, inode }
    }
}

impl Drop for InodePin {
    fn drop(&mut self) {
        lock(&self.tree).unpin(self.inode);
        tracing::trace!("released inode {}", self.inode);
    }
}

/// Notify watchers; nobody listening is not an error
pub(super) fn emit(events: &broadcast::Sender<FileEvent>, path: &FsPath, kind: FileEventKind) {
    let _ = events.send(FileEvent::new(path.clone(), kind));
}

pub(super) struct MemoryMetadataView {
    pub pin: InodePin,
    pub path: FsPath,
    pub events: broadcast::Sender<FileEvent>,
}

impl MemoryMetadataView {
    fn update(&self, apply: impl FnOnce(&mut super::tree::Inode)) -> io::Result<()> {
        {
            let mut tree = lock(&self.pin.tree);
            let node = tree.node_mut(self.pin.inode)?;
            if matches!(node.kind, NodeKind::Symlink(_)) {
                return Err(unsupported("updating symbolic link attributes"));
            }
            apply(node);
        }
        emit(&self.events, &self.path, FileEventKind::Modified);
        Ok(())
    }
}

#[async_trait]
impl FileMetadataView for MemoryMetadataView {
    async fn read_metadata(&self) -> io::Result<FileMetadata> {
        let tree = lock(&self.pin.tree);
        let node = tree.node(self.pin.inode)?;
        Ok(node.metadata(tree.device, self.pin.inode))
    }

    async fn set_modified(&self, time: SystemTime) -> io::Result<()> {
        self.update(|node| node.modified = time)
    }

    async fn set_permissions(&self, permissions: FilePermissions) -> io::Result<()> {
        self.update(|node| node.mode = permissions.mode())
    }
}

pub(super) struct MemoryFileContent {
    pub pin: InodePin,
    pub mode: ContentOpenMode,
    pub path: FsPath,
    pub events: broadcast::Sender<FileEvent>,
}

#[async_trait]
impl FileContent for MemoryFileContent {
    async fn read_at(&self, position: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.mode.ensure_readable(&self.path)?;
        lock(&self.pin.tree).read_file(self.pin.inode, position, buf)
    }

    async fn write_at(&self, position: u64, buf: &[u8]) -> io::Result<usize> {
        self.mode.ensure_writable(&self.path)?;
        let position = if self.mode.append { None } else { Some(position) };
        let written = lock(&self.pin.tree).write_file(self.pin.inode, position, buf)?;
        emit(&self.events, &self.path, FileEventKind::Modified);
        Ok(written)
    }

    async fn size(&self) -> io::Result<u64> {
        lock(&self.pin.tree).file_len(self.pin.inode)
    }

    async fn set_size(&self, size: u64) -> io::Result<()> {
        self.mode.ensure_writable(&self.path)?;
        lock(&self.pin.tree).set_file_len(self.pin.inode, size)?;
        emit(&self.events, &self.path, FileEventKind::Modified);
        Ok(())
    }

    async fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Entries are captured when the stream is opened; types are looked up as
/// each entry is read, skipping entries deleted in between.
pub(super) struct MemoryDirectoryStream {
    pub pin: InodePin,
    pub entries: std::vec::IntoIter<(OsString, u64)>,
    pub read_type: bool,
}

#[async_trait]
impl DirectoryStream for MemoryDirectoryStream {
    async fn read(&mut self) -> io::Result<Option<DirectoryEntry>> {
        for (name, inode) in self.entries.by_ref() {
            if !self.read_type {
                return Ok(Some(DirectoryEntry::new(name)));
            }
            let tree = lock(&self.pin.tree);
            if let Ok(node) = tree.node(inode) {
                return Ok(Some(DirectoryEntry::new(name).with_file_type(node.file_type())));
            }
        }
        Ok(None)
    }
}

pub(super) struct MemoryFileStore {
    pub tree: SharedTree,
    pub name: String,
}

#[async_trait]
impl FileStore for MemoryFileStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &str {
        "memory"
    }

    async fn read_metadata(&self) -> io::Result<FileStoreMetadata> {
        let tree = lock(&self.tree);
        let free = tree.capacity_bytes().saturating_sub(tree.used_bytes());
        Ok(FileStoreMetadata {
            total_space: tree.capacity_bytes(),
            free_space: free,
            available_space: free,
            block_size: 1,
            read_only: false,
        })
    }
}
