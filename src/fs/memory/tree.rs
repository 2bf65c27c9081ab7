//! Inode table and path resolution for the in-memory file system

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use crate::byte_string::ByteString;
use crate::config::MemoryFsConfig;
use crate::error::{
    already_exists, directory_not_empty, invalid_argument, not_a_directory, not_found,
    too_many_links,
};
use crate::fs::metadata::{FileKey, FileMetadata, FilePermissions, FileType};
use crate::path::FsPath;

pub(super) const ROOT_INODE: u64 = 1;

pub(super) const DEFAULT_FILE_MODE: u32 = 0o644;
pub(super) const DEFAULT_DIRECTORY_MODE: u32 = 0o755;
pub(super) const DEFAULT_SYMLINK_MODE: u32 = 0o777;

pub(super) enum NodeKind {
    File(Vec<u8>),
    Directory(BTreeMap<OsString, u64>),
    Symlink(ByteString),
}

pub(super) struct Inode {
    pub kind: NodeKind,
    pub mode: u32,
    pub modified: SystemTime,
    pub accessed: SystemTime,
    pub created: SystemTime,
    /// Directory entries naming this inode
    pub link_count: u64,
    /// Live handles; the inode outlives its last name while this is non-zero
    pub open_handles: usize,
}

impl Inode {
    fn new(kind: NodeKind, mode: u32) -> Self {
        let now = SystemTime::now();
        Self {
            kind,
            mode,
            modified: now,
            accessed: now,
            created: now,
            link_count: 0,
            open_handles: 0,
        }
    }

    pub fn file_type(&self) -> FileType {
        match self.kind {
            NodeKind::File(_) => FileType::File,
            NodeKind::Directory(_) => FileType::Directory,
            NodeKind::Symlink(_) => FileType::Symlink,
        }
    }

    pub fn size(&self) -> u64 {
        match &self.kind {
            NodeKind::File(data) => data.len() as u64,
            NodeKind::Directory(_) => 0,
            NodeKind::Symlink(target) => target.len() as u64,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory(_))
    }

    fn stored_bytes(&self) -> u64 {
        match &self.kind {
            NodeKind::File(data) => data.len() as u64,
            _ => 0,
        }
    }

    pub fn metadata(&self, device: u64, inode: u64) -> FileMetadata {
        let mut metadata = FileMetadata::new(self.file_type(), self.size())
            .with_modified(self.modified)
            .with_permissions(FilePermissions::from_mode(self.mode))
            .with_file_key(FileKey { device, inode });
        metadata.accessed = Some(self.accessed);
        metadata.created = Some(self.created);
        metadata.link_count = Some(self.link_count);
        metadata
    }
}

/// Chain of (name, inode) pairs from the root to a resolved file
#[derive(Debug, Default)]
pub(super) struct Resolved {
    chain: Vec<(OsString, u64)>,
}

impl Resolved {
    pub fn inode(&self) -> u64 {
        self.chain.last().map(|(_, inode)| *inode).unwrap_or(ROOT_INODE)
    }

    pub fn contains(&self, inode: u64) -> bool {
        inode == ROOT_INODE || self.chain.iter().any(|(_, i)| *i == inode)
    }

    /// Absolute path spelled without `.`, `..` or symbolic links
    pub fn real_path(&self) -> PathBuf {
        let mut path = PathBuf::from("/");
        for (name, _) in &self.chain {
            path.push(name);
        }
        path
    }
}

enum Segment {
    Parent,
    Name(OsString),
}

fn segments(path: &Path) -> Vec<Segment> {
    path.components()
        .filter_map(|component| match component {
            Component::ParentDir => Some(Segment::Parent),
            Component::Normal(name) => Some(Segment::Name(name.to_os_string())),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => None,
        })
        .collect()
}

pub(super) struct Tree {
    nodes: HashMap<u64, Inode>,
    next_inode: u64,
    used_bytes: u64,
    capacity_bytes: u64,
    max_symlink_depth: usize,
    pub device: u64,
}

pub(super) type SharedTree = std::sync::Arc<Mutex<Tree>>;

/// Lock the tree. Critical sections never panic midway through a mutation,
/// so a poisoned lock still guards a consistent tree.
pub(super) fn lock(tree: &Mutex<Tree>) -> MutexGuard<'_, Tree> {
    tree.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Tree {
    pub fn new(config: &MemoryFsConfig, device: u64) -> Self {
        let mut root = Inode::new(
            NodeKind::Directory(BTreeMap::new()),
            DEFAULT_DIRECTORY_MODE,
        );
        root.link_count = 1;
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_INODE, root);
        Self {
            nodes,
            next_inode: ROOT_INODE + 1,
            used_bytes: 0,
            capacity_bytes: config.capacity_bytes,
            max_symlink_depth: config.max_symlink_depth,
            device,
        }
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    pub fn node(&self, inode: u64) -> io::Result<&Inode> {
        self.nodes
            .get(&inode)
            .ok_or_else(|| io::Error::other(format!("stale inode {}", inode)))
    }

    pub fn node_mut(&mut self, inode: u64) -> io::Result<&mut Inode> {
        self.nodes
            .get_mut(&inode)
            .ok_or_else(|| io::Error::other(format!("stale inode {}", inode)))
    }

    fn entries(&self, inode: u64, path: &FsPath) -> io::Result<&BTreeMap<OsString, u64>> {
        match &self.node(inode)?.kind {
            NodeKind::Directory(entries) => Ok(entries),
            _ => Err(not_a_directory(path)),
        }
    }

    fn entries_mut(
        &mut self,
        inode: u64,
        path: &FsPath,
    ) -> io::Result<&mut BTreeMap<OsString, u64>> {
        match &mut self.node_mut(inode)?.kind {
            NodeKind::Directory(entries) => Ok(entries),
            _ => Err(not_a_directory(path)),
        }
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Walk `path` from the root.
    ///
    /// Symbolic links in intermediate segments are always followed; the final
    /// segment is followed only when `follow_last` is set.
    pub fn resolve(&self, path: &FsPath, follow_last: bool) -> io::Result<Resolved> {
        self.resolve_path(path, path.as_path(), follow_last)
    }

    fn resolve_path(
        &self,
        display: &FsPath,
        path: &Path,
        follow_last: bool,
    ) -> io::Result<Resolved> {
        if !path.has_root() {
            return Err(invalid_argument(format!(
                "Path must be absolute: {}",
                display
            )));
        }

        let mut resolved = Resolved::default();
        let mut pending: Vec<Segment> = segments(path).into_iter().rev().collect();
        let mut hops = 0;

        while let Some(segment) = pending.pop() {
            let name = match segment {
                Segment::Parent => {
                    resolved.chain.pop();
                    continue;
                }
                Segment::Name(name) => name,
            };
            let inode = *self
                .entries(resolved.inode(), display)?
                .get(&name)
                .ok_or_else(|| not_found(display))?;

            if let NodeKind::Symlink(target) = &self.node(inode)?.kind {
                if !pending.is_empty() || follow_last {
                    hops += 1;
                    if hops > self.max_symlink_depth {
                        return Err(too_many_links(display));
                    }
                    let target = target.to_path_buf();
                    if target.has_root() {
                        resolved.chain.clear();
                    }
                    pending.extend(segments(&target).into_iter().rev());
                    continue;
                }
            }
            resolved.chain.push((name, inode));
        }
        Ok(resolved)
    }

    /// Resolve the directory that holds `path`, returning it with the final
    /// name. The name itself is not looked up.
    pub fn resolve_parent(&self, path: &FsPath) -> io::Result<(Resolved, OsString)> {
        let name = path
            .file_name()
            .ok_or_else(|| invalid_argument(format!("Path has no file name: {}", path)))?
            .to_os_string();
        let parent = path.as_path().parent().unwrap_or_else(|| Path::new("/"));
        let resolved = self.resolve_path(path, parent, true)?;
        if !self.node(resolved.inode())?.is_dir() {
            return Err(not_a_directory(path));
        }
        Ok((resolved, name))
    }

    /// Where a file created through `path` lands: its directory, its name
    /// and its path. A dangling symbolic link in the final segment is
    /// followed to the location it names.
    pub fn resolve_create(&self, path: &FsPath) -> io::Result<(Resolved, OsString, FsPath)> {
        let mut current = path.clone();
        let mut hops = 0;
        loop {
            let (parent, name) = self.resolve_parent(&current)?;
            let Some(inode) = self.lookup(parent.inode(), &name) else {
                return Ok((parent, name, current));
            };
            let NodeKind::Symlink(target) = &self.node(inode)?.kind else {
                return Err(already_exists(&current));
            };
            hops += 1;
            if hops > self.max_symlink_depth {
                return Err(too_many_links(path));
            }
            let target = target.to_path_buf();
            current = if target.has_root() {
                path.with_path(target)
            } else {
                path.with_path(parent.real_path().join(target))
            };
        }
    }

    pub fn lookup(&self, directory: u64, name: &OsString) -> Option<u64> {
        match &self.nodes.get(&directory)?.kind {
            NodeKind::Directory(entries) => entries.get(name).copied(),
            _ => None,
        }
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    pub fn has_room(&self, additional: u64) -> bool {
        self.used_bytes.saturating_add(additional) <= self.capacity_bytes
    }

    fn reserve(&mut self, additional: u64) -> io::Result<()> {
        if !self.has_room(additional) {
            return Err(io::Error::new(
                io::ErrorKind::StorageFull,
                format!(
                    "In-memory file system full: {} of {} bytes used",
                    self.used_bytes, self.capacity_bytes
                ),
            ));
        }
        self.used_bytes += additional;
        Ok(())
    }

    /// Create an unlinked inode
    pub fn allocate(&mut self, kind: NodeKind, mode: u32) -> io::Result<u64> {
        let node = Inode::new(kind, mode);
        self.reserve(node.stored_bytes())?;
        let inode = self.next_inode;
        self.next_inode += 1;
        self.nodes.insert(inode, node);
        Ok(inode)
    }

    fn touch(&mut self, inode: u64) {
        if let Some(node) = self.nodes.get_mut(&inode) {
            node.modified = SystemTime::now();
        }
    }

    /// Add a directory entry naming `inode`
    pub fn link(
        &mut self,
        directory: u64,
        name: OsString,
        inode: u64,
        path: &FsPath,
    ) -> io::Result<()> {
        let entries = self.entries_mut(directory, path)?;
        if entries.contains_key(&name) {
            return Err(already_exists(path));
        }
        entries.insert(name, inode);
        self.node_mut(inode)?.link_count += 1;
        self.touch(directory);
        Ok(())
    }

    /// Remove a directory entry, dropping the inode once nothing refers to it
    pub fn unlink(&mut self, directory: u64, name: &OsString, path: &FsPath) -> io::Result<u64> {
        let inode = self.lookup(directory, name).ok_or_else(|| not_found(path))?;
        let node = self.node(inode)?;
        if let NodeKind::Directory(entries) = &node.kind {
            if !entries.is_empty() {
                return Err(directory_not_empty(path));
            }
        }
        self.entries_mut(directory, path)?.remove(name);
        self.touch(directory);
        let node = self.node_mut(inode)?;
        node.link_count = node.link_count.saturating_sub(1);
        self.collect(inode);
        Ok(inode)
    }

    /// Move a directory entry without touching link counts
    pub fn rename_entry(
        &mut self,
        from_directory: u64,
        from_name: &OsString,
        to_directory: u64,
        to_name: OsString,
        path: &FsPath,
    ) -> io::Result<()> {
        let inode = self
            .entries_mut(from_directory, path)?
            .remove(from_name)
            .ok_or_else(|| not_found(path))?;
        self.entries_mut(to_directory, path)?.insert(to_name, inode);
        self.touch(from_directory);
        self.touch(to_directory);
        Ok(())
    }

    pub fn pin(&mut self, inode: u64) -> io::Result<()> {
        self.node_mut(inode)?.open_handles += 1;
        Ok(())
    }

    pub fn unpin(&mut self, inode: u64) {
        if let Some(node) = self.nodes.get_mut(&inode) {
            node.open_handles = node.open_handles.saturating_sub(1);
        }
        self.collect(inode);
    }

    fn collect(&mut self, inode: u64) {
        let unreferenced = self
            .nodes
            .get(&inode)
            .is_some_and(|node| node.link_count == 0 && node.open_handles == 0);
        if unreferenced && inode != ROOT_INODE {
            if let Some(node) = self.nodes.remove(&inode) {
                self.used_bytes = self.used_bytes.saturating_sub(node.stored_bytes());
            }
        }
    }

    /// Create every missing ancestor directory of `path`, returning the
    /// paths created
    pub fn create_parents(&mut self, path: &FsPath) -> io::Result<Vec<FsPath>> {
        let mut ancestors: Vec<PathBuf> = path
            .as_path()
            .ancestors()
            .skip(1)
            .filter(|ancestor| ancestor.file_name().is_some())
            .map(Path::to_path_buf)
            .collect();
        ancestors.reverse();

        let mut created = Vec::new();
        for ancestor in ancestors {
            let ancestor = path.with_path(ancestor);
            match self.resolve(&ancestor, true) {
                Ok(resolved) => {
                    if !self.node(resolved.inode())?.is_dir() {
                        return Err(not_a_directory(&ancestor));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    let (parent, name) = self.resolve_parent(&ancestor)?;
                    let inode = self.allocate(
                        NodeKind::Directory(BTreeMap::new()),
                        DEFAULT_DIRECTORY_MODE,
                    )?;
                    self.link(parent.inode(), name, inode, &ancestor)?;
                    created.push(ancestor);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(created)
    }

    // ========================================================================
    // File data
    // ========================================================================

    fn file_data(&self, inode: u64) -> io::Result<&Vec<u8>> {
        match &self.node(inode)?.kind {
            NodeKind::File(data) => Ok(data),
            _ => Err(invalid_argument("Not a regular file")),
        }
    }

    fn file_data_mut(&mut self, inode: u64) -> io::Result<&mut Vec<u8>> {
        match &mut self.node_mut(inode)?.kind {
            NodeKind::File(data) => Ok(data),
            _ => Err(invalid_argument("Not a regular file")),
        }
    }

    pub fn read_file(&mut self, inode: u64, position: u64, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.file_data(inode)?;
        let start = usize::try_from(position).unwrap_or(usize::MAX).min(data.len());
        let len = buf.len().min(data.len() - start);
        buf[..len].copy_from_slice(&data[start..start + len]);
        self.node_mut(inode)?.accessed = SystemTime::now();
        Ok(len)
    }

    /// Write at `position` (or at the end when `position` is `None`)
    pub fn write_file(&mut self, inode: u64, position: Option<u64>, buf: &[u8]) -> io::Result<usize> {
        let current_len = self.file_data(inode)?.len() as u64;
        let start = position.unwrap_or(current_len);
        let end = start
            .checked_add(buf.len() as u64)
            .ok_or_else(|| invalid_argument("Write position overflows"))?;
        if end > current_len {
            self.reserve(end - current_len)?;
        }
        let end = usize::try_from(end).map_err(|_| invalid_argument("File too large"))?;
        let start = start as usize;
        let data = self.file_data_mut(inode)?;
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        self.touch(inode);
        Ok(buf.len())
    }

    pub fn set_file_len(&mut self, inode: u64, len: u64) -> io::Result<()> {
        let current_len = self.file_data(inode)?.len() as u64;
        if len > current_len {
            self.reserve(len - current_len)?;
        } else {
            self.used_bytes = self.used_bytes.saturating_sub(current_len - len);
        }
        let len = usize::try_from(len).map_err(|_| invalid_argument("File too large"))?;
        self.file_data_mut(inode)?.resize(len, 0);
        self.touch(inode);
        Ok(())
    }

    pub fn file_len(&self, inode: u64) -> io::Result<u64> {
        Ok(self.file_data(inode)?.len() as u64)
    }
}
