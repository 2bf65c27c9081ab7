//! In-memory backend, scheme `memory`
//!
//! A POSIX-like tree of inodes behind one lock: hard links, symbolic links
//! (relative targets resolve against the link's directory), permission
//! bits, and files that stay readable through open handles after their
//! last name is deleted. Every mutation is published to watchers as a
//! `FileEvent`.

mod handles;
mod tree;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use self::handles::{
    emit, InodePin, MemoryDirectoryStream, MemoryFileContent, MemoryFileStore,
    MemoryMetadataView,
};
use self::tree::{
    lock, NodeKind, SharedTree, Tree, DEFAULT_DIRECTORY_MODE, DEFAULT_FILE_MODE,
    DEFAULT_SYMLINK_MODE,
};
use super::backend::{check_scheme, FileSystem};
use super::content::FileContent;
use super::directory::DirectoryStream;
use super::metadata::FileMetadataView;
use super::store::FileStore;
use crate::byte_string::ByteString;
use crate::config::MemoryFsConfig;
use crate::error::{
    access_denied, already_exists, directory_not_empty, invalid_argument, is_a_directory,
    not_a_directory, not_found,
};
use crate::event::{FileEvent, FileEventKind};
use crate::options::{
    follows_links, reads_type, AccessMode, ContentOpenMode, CopyFileOption, CopyMode,
    CreateFileOption, CreateMode, CreateTarget, DirectoryStreamOption, FileContentOption,
    FileMetadataOption,
};
use crate::path::{FsPath, MEMORY_SCHEME};

/// Device ids keep file keys distinct across instances
static NEXT_DEVICE: AtomicU64 = AtomicU64::new(1);

/// In-memory file system
///
/// Cloning yields another handle on the same tree.
#[derive(Clone)]
pub struct MemoryFileSystem {
    tree: SharedTree,
    events: broadcast::Sender<FileEvent>,
}

impl std::fmt::Debug for MemoryFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tree = lock(&self.tree);
        f.debug_struct("MemoryFileSystem")
            .field("device", &tree.device)
            .field("used_bytes", &tree.used_bytes())
            .field("capacity_bytes", &tree.capacity_bytes())
            .finish()
    }
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::with_config(MemoryFsConfig::default())
    }

    pub fn with_config(config: MemoryFsConfig) -> Self {
        let device = NEXT_DEVICE.fetch_add(1, Ordering::Relaxed);
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            tree: Arc::new(Mutex::new(Tree::new(&config, device))),
            events,
        }
    }

    /// Subscribe to events for every mutation made from now on
    pub fn watch(&self) -> FileEventReceiver {
        FileEventReceiver {
            inner: self.events.subscribe(),
        }
    }

    /// Bytes of file content currently stored, including deleted files that
    /// are still open
    pub fn used_bytes(&self) -> u64 {
        lock(&self.tree).used_bytes()
    }

    fn emit(&self, path: &FsPath, kind: FileEventKind) {
        emit(&self.events, path, kind);
    }

    fn pin(&self, tree: &mut Tree, inode: u64) -> io::Result<InodePin> {
        tree.pin(inode)?;
        Ok(InodePin::new(self.tree.clone(), inode))
    }
}

/// Receiving end of a watch on a `MemoryFileSystem`
///
/// A watcher that falls more than `event_buffer` events behind receives a
/// single `Overflow` event in place of the ones it missed.
pub struct FileEventReceiver {
    inner: broadcast::Receiver<FileEvent>,
}

impl FileEventReceiver {
    /// Wait for the next event; `None` once the file system is gone
    pub async fn recv(&mut self) -> Option<FileEvent> {
        match self.inner.recv().await {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!("file watcher lagged, {} events dropped", missed);
                Some(FileEvent::overflow())
            }
            Err(RecvError::Closed) => None,
        }
    }

    /// Next event if one is queued
    pub fn try_recv(&mut self) -> Option<FileEvent> {
        match self.inner.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Lagged(missed)) => {
                tracing::warn!("file watcher lagged, {} events dropped", missed);
                Some(FileEvent::overflow())
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }
}

fn required_bits(mode: AccessMode) -> u32 {
    match mode {
        AccessMode::Read => 0o400,
        AccessMode::Write => 0o200,
        AccessMode::Execute => 0o100,
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    fn scheme(&self) -> &str {
        MEMORY_SCHEME
    }

    async fn real_path(&self, path: &FsPath) -> io::Result<FsPath> {
        check_scheme(self, path)?;
        let resolved = lock(&self.tree).resolve(path, true)?;
        Ok(path.with_path(resolved.real_path()))
    }

    async fn check_access(&self, path: &FsPath, modes: &[AccessMode]) -> io::Result<()> {
        check_scheme(self, path)?;
        let tree = lock(&self.tree);
        let node = tree.node(tree.resolve(path, true)?.inode())?;
        if modes
            .iter()
            .all(|mode| node.mode & required_bits(*mode) != 0)
        {
            Ok(())
        } else {
            Err(access_denied(path))
        }
    }

    async fn open_metadata_view(
        &self,
        file: &FsPath,
        options: &[FileMetadataOption],
    ) -> io::Result<Box<dyn FileMetadataView>> {
        check_scheme(self, file)?;
        let mut tree = lock(&self.tree);
        let inode = tree.resolve(file, follows_links(options))?.inode();
        let pin = self.pin(&mut tree, inode)?;
        Ok(Box::new(MemoryMetadataView {
            pin,
            path: file.clone(),
            events: self.events.clone(),
        }))
    }

    async fn open_content(
        &self,
        file: &FsPath,
        options: &[FileContentOption],
    ) -> io::Result<Box<dyn FileContent>> {
        let mode = ContentOpenMode::from_options(options)?;
        check_scheme(self, file)?;
        tracing::debug!("open_content {} {:?}", file, mode);

        let mut tree = lock(&self.tree);
        let mut created = None;
        let inode = match tree.resolve(file, mode.follow_links) {
            Ok(resolved) => {
                if mode.create_new {
                    return Err(already_exists(file));
                }
                let inode = resolved.inode();
                let node = tree.node(inode)?;
                match node.kind {
                    NodeKind::File(_) => {}
                    NodeKind::Directory(_) => return Err(is_a_directory(file)),
                    NodeKind::Symlink(_) => {
                        return Err(invalid_argument(format!("{} is a symbolic link", file)))
                    }
                }
                if (mode.read && node.mode & 0o400 == 0)
                    || (mode.is_writable() && node.mode & 0o200 == 0)
                {
                    return Err(access_denied(file));
                }
                if mode.truncate {
                    tree.set_file_len(inode, 0)?;
                }
                inode
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound && (mode.create || mode.create_new) => {
                let (parent, name) = tree.resolve_parent(file)?;
                // A dangling symbolic link still occupies the name
                if mode.create_new && tree.lookup(parent.inode(), &name).is_some() {
                    return Err(already_exists(file));
                }
                let (parent, name, location) = tree.resolve_create(file)?;
                let inode = tree.allocate(NodeKind::File(Vec::new()), DEFAULT_FILE_MODE)?;
                tree.link(parent.inode(), name, inode, &location)?;
                created = Some(location);
                inode
            }
            Err(e) => return Err(e),
        };
        let pin = self.pin(&mut tree, inode)?;
        drop(tree);

        if let Some(location) = &created {
            self.emit(location, FileEventKind::Created);
        } else if mode.truncate {
            self.emit(file, FileEventKind::Modified);
        }
        Ok(Box::new(MemoryFileContent {
            pin,
            mode,
            path: file.clone(),
            events: self.events.clone(),
        }))
    }

    async fn open_directory_stream(
        &self,
        directory: &FsPath,
        options: &[DirectoryStreamOption],
    ) -> io::Result<Box<dyn DirectoryStream>> {
        check_scheme(self, directory)?;
        let mut tree = lock(&self.tree);
        let inode = tree.resolve(directory, true)?.inode();
        let entries: Vec<_> = match &tree.node(inode)?.kind {
            NodeKind::Directory(entries) => entries
                .iter()
                .map(|(name, inode)| (name.clone(), *inode))
                .collect(),
            _ => return Err(not_a_directory(directory)),
        };
        let pin = self.pin(&mut tree, inode)?;
        Ok(Box::new(MemoryDirectoryStream {
            pin,
            entries: entries.into_iter(),
            read_type: reads_type(options),
        }))
    }

    async fn create_directory(
        &self,
        directory: &FsPath,
        options: &[CreateFileOption],
    ) -> io::Result<()> {
        let mode = CreateMode::from_options(options, CreateTarget::Directory)?;
        check_scheme(self, directory)?;

        let mut created = Vec::new();
        {
            let mut tree = lock(&self.tree);
            if mode.create_parents {
                created = tree.create_parents(directory)?;
            }
            let (parent, name) = tree.resolve_parent(directory)?;
            if tree.lookup(parent.inode(), &name).is_some() {
                let existing_is_dir = match tree.resolve(directory, true) {
                    Ok(resolved) => tree.node(resolved.inode())?.is_dir(),
                    Err(_) => false,
                };
                if mode.allow_existing && existing_is_dir {
                    drop(tree);
                    for path in &created {
                        self.emit(path, FileEventKind::Created);
                    }
                    return Ok(());
                }
                return Err(already_exists(directory));
            }
            let inode = tree.allocate(
                NodeKind::Directory(BTreeMap::new()),
                DEFAULT_DIRECTORY_MODE,
            )?;
            tree.link(parent.inode(), name, inode, directory)?;
        }

        created.push(directory.clone());
        for path in &created {
            self.emit(path, FileEventKind::Created);
        }
        Ok(())
    }

    async fn read_symbolic_link(&self, link: &FsPath) -> io::Result<ByteString> {
        check_scheme(self, link)?;
        let tree = lock(&self.tree);
        match &tree.node(tree.resolve(link, false)?.inode())?.kind {
            NodeKind::Symlink(target) => Ok(target.clone()),
            _ => Err(invalid_argument(format!("Not a symbolic link: {}", link))),
        }
    }

    async fn create_symbolic_link(
        &self,
        link: &FsPath,
        target: &ByteString,
        options: &[CreateFileOption],
    ) -> io::Result<()> {
        let mode = CreateMode::from_options(options, CreateTarget::SymbolicLink)?;
        check_scheme(self, link)?;
        if target.is_empty() || target.contains(0) {
            return Err(invalid_argument("Invalid symbolic link target"));
        }

        let mut created = Vec::new();
        {
            let mut tree = lock(&self.tree);
            if mode.create_parents {
                created = tree.create_parents(link)?;
            }
            let (parent, name) = tree.resolve_parent(link)?;
            if tree.lookup(parent.inode(), &name).is_some() {
                return Err(already_exists(link));
            }
            let inode = tree.allocate(NodeKind::Symlink(target.clone()), DEFAULT_SYMLINK_MODE)?;
            tree.link(parent.inode(), name, inode, link)?;
        }

        created.push(link.clone());
        for path in &created {
            self.emit(path, FileEventKind::Created);
        }
        Ok(())
    }

    async fn create_hard_link(&self, link: &FsPath, existing: &FsPath) -> io::Result<()> {
        check_scheme(self, link)?;
        check_scheme(self, existing)?;
        {
            let mut tree = lock(&self.tree);
            let inode = tree.resolve(existing, false)?.inode();
            if tree.node(inode)?.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("Hard links to directories are not allowed: {}", existing),
                ));
            }
            let (parent, name) = tree.resolve_parent(link)?;
            if tree.lookup(parent.inode(), &name).is_some() {
                return Err(already_exists(link));
            }
            tree.link(parent.inode(), name, inode, link)?;
        }
        self.emit(link, FileEventKind::Created);
        Ok(())
    }

    async fn delete(&self, path: &FsPath) -> io::Result<()> {
        check_scheme(self, path)?;
        {
            let mut tree = lock(&self.tree);
            let (parent, name) = tree.resolve_parent(path)?;
            tree.unlink(parent.inode(), &name, path)?;
        }
        tracing::debug!("deleted {}", path);
        self.emit(path, FileEventKind::Deleted);
        Ok(())
    }

    async fn is_same_file(&self, path1: &FsPath, path2: &FsPath) -> io::Result<bool> {
        if path1.scheme() != path2.scheme() {
            return Ok(false);
        }
        check_scheme(self, path1)?;
        if path1 == path2 {
            return Ok(true);
        }
        let tree = lock(&self.tree);
        let first = tree.resolve(path1, true)?.inode();
        let second = tree.resolve(path2, true)?.inode();
        Ok(first == second)
    }

    async fn copy(
        &self,
        source: &FsPath,
        target: &FsPath,
        options: &[CopyFileOption],
    ) -> io::Result<()> {
        let mode = CopyMode::for_copy(options)?;
        check_scheme(self, source)?;
        check_scheme(self, target)?;
        tracing::debug!("copy {} -> {} {:?}", source, target, mode);

        {
            let mut tree = lock(&self.tree);
            let source_inode = tree.resolve(source, mode.follow_links)?.inode();
            if let Ok(resolved) = tree.resolve(target, true) {
                if resolved.inode() == source_inode {
                    return Ok(());
                }
            }

            let node = tree.node(source_inode)?;
            let (kind, default_mode) = match &node.kind {
                NodeKind::File(data) => (NodeKind::File(data.clone()), DEFAULT_FILE_MODE),
                NodeKind::Directory(_) => {
                    (NodeKind::Directory(BTreeMap::new()), DEFAULT_DIRECTORY_MODE)
                }
                NodeKind::Symlink(link) => (NodeKind::Symlink(link.clone()), DEFAULT_SYMLINK_MODE),
            };
            let (source_mode, source_modified) = (node.mode, node.modified);
            let needed = match &kind {
                NodeKind::File(data) => data.len() as u64,
                _ => 0,
            };
            if !tree.has_room(needed) {
                return Err(io::Error::new(
                    io::ErrorKind::StorageFull,
                    format!("In-memory file system full copying {}", source),
                ));
            }

            let (parent, name) = tree.resolve_parent(target)?;
            if tree.lookup(parent.inode(), &name).is_some() {
                if !mode.replace_existing {
                    return Err(already_exists(target));
                }
                tree.unlink(parent.inode(), &name, target)?;
            }

            let inode = tree.allocate(
                kind,
                if mode.copy_attributes {
                    source_mode
                } else {
                    default_mode
                },
            )?;
            if mode.copy_attributes {
                tree.node_mut(inode)?.modified = source_modified;
            }
            tree.link(parent.inode(), name, inode, target)?;
        }

        self.emit(target, FileEventKind::Created);
        Ok(())
    }

    async fn move_file(
        &self,
        source: &FsPath,
        target: &FsPath,
        options: &[CopyFileOption],
    ) -> io::Result<()> {
        // Renames within one tree are always atomic
        let mode = CopyMode::for_move(options)?;
        check_scheme(self, source)?;
        check_scheme(self, target)?;
        tracing::debug!("move {} -> {} {:?}", source, target, mode);

        {
            let mut tree = lock(&self.tree);
            let (source_parent, source_name) = tree.resolve_parent(source)?;
            let inode = tree
                .lookup(source_parent.inode(), &source_name)
                .ok_or_else(|| not_found(source))?;
            let source_is_dir = tree.node(inode)?.is_dir();

            let (target_parent, target_name) = tree.resolve_parent(target)?;
            if source_parent.inode() == target_parent.inode() && source_name == target_name {
                return Ok(());
            }
            if source_is_dir && target_parent.contains(inode) {
                return Err(invalid_argument(format!(
                    "Cannot move {} into itself",
                    source
                )));
            }

            if let Some(existing) = tree.lookup(target_parent.inode(), &target_name) {
                if existing == inode {
                    return Ok(());
                }
                if !mode.replace_existing {
                    return Err(already_exists(target));
                }
                let existing_is_dir = tree.node(existing)?.is_dir();
                if existing_is_dir && !source_is_dir {
                    return Err(is_a_directory(target));
                }
                if source_is_dir && !existing_is_dir {
                    return Err(not_a_directory(target));
                }
                if let NodeKind::Directory(entries) = &tree.node(existing)?.kind {
                    if !entries.is_empty() {
                        return Err(directory_not_empty(target));
                    }
                }
                tree.unlink(target_parent.inode(), &target_name, target)?;
            }

            tree.rename_entry(
                source_parent.inode(),
                &source_name,
                target_parent.inode(),
                target_name,
                source,
            )?;
        }

        self.emit(source, FileEventKind::Deleted);
        self.emit(target, FileEventKind::Created);
        Ok(())
    }

    async fn open_file_store(&self, path: &FsPath) -> io::Result<Box<dyn FileStore>> {
        check_scheme(self, path)?;
        let tree = lock(&self.tree);
        tree.resolve(path, true)?;
        Ok(Box::new(MemoryFileStore {
            tree: self.tree.clone(),
            name: format!("memory-{}", tree.device),
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================
