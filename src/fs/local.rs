//! Local disk backend
//!
//! Built on `tokio::fs`. System calls tokio does not wrap (access(2),
//! statvfs(2), setting timestamps) run on the blocking pool.

use async_trait::async_trait;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use super::backend::{check_scheme, FileSystem};
use super::content::FileContent;
use super::directory::{DirectoryEntry, DirectoryStream};
use super::metadata::{FileMetadata, FileMetadataView, FilePermissions, FileType};
use super::store::{FileStore, FileStoreMetadata};
use crate::byte_string::ByteString;
use crate::config::LocalFsConfig;
use crate::error::{already_exists, unsupported};
use crate::options::{
    follows_links, reads_type, AccessMode, ContentOpenMode, CopyFileOption, CopyMode,
    CreateFileOption, CreateMode, CreateTarget, DirectoryStreamOption, FileContentOption,
    FileMetadataOption,
};
use crate::path::{FsPath, FILE_SCHEME};

/// File system backed by the local disk, scheme `file`
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem {
    config: LocalFsConfig,
}

impl LocalFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LocalFsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LocalFsConfig {
        &self.config
    }

    fn local_path<'a>(&self, path: &'a FsPath) -> io::Result<&'a Path> {
        check_scheme(self, path)?;
        Ok(path.as_path())
    }

    /// Get a unique temporary sibling path for atomic copies (using PID and timestamp)
    fn temp_path_for(dest_path: &Path) -> PathBuf {
        let file_name = dest_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "fresh-copy".to_string());
        let timestamp = SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        dest_path.with_file_name(format!(
            ".{}.{}-{}.tmp",
            file_name,
            std::process::id(),
            timestamp
        ))
    }

    /// Fail with `AlreadyExists` for an existing target unless replacing.
    ///
    /// Returns whether the target exists.
    async fn check_target(
        &self,
        target: &FsPath,
        local: &Path,
        replace_existing: bool,
    ) -> io::Result<bool> {
        match tokio::fs::symlink_metadata(local).await {
            Ok(_) if !replace_existing => Err(already_exists(target)),
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Copy a regular file through a temporary sibling so the target is
    /// replaced in one rename
    async fn copy_file_atomically(&self, source: &Path, target: &Path) -> io::Result<()> {
        let temp_path = Self::temp_path_for(target);
        if let Err(e) = tokio::fs::copy(source, &temp_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&temp_path, target).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }
        Ok(())
    }

    async fn copy_attributes(source_meta: &std::fs::Metadata, target: &Path) -> io::Result<()> {
        tokio::fs::set_permissions(target, source_meta.permissions()).await?;
        if let Ok(modified) = source_meta.modified() {
            set_modified_blocking(target.to_path_buf(), modified).await?;
        }
        Ok(())
    }

    #[cfg(unix)]
    async fn copy_symbolic_link(source: &Path, target: &Path) -> io::Result<()> {
        let link_target = tokio::fs::read_link(source).await?;
        tokio::fs::symlink(link_target, target).await
    }

    #[cfg(not(unix))]
    async fn copy_symbolic_link(_source: &Path, _target: &Path) -> io::Result<()> {
        Err(unsupported("copy symbolic link"))
    }
}

async fn set_modified_blocking(path: PathBuf, modified: SystemTime) -> io::Result<()> {
    tokio::task::spawn_blocking(move || std::fs::File::open(&path)?.set_modified(modified))
        .await
        .map_err(io::Error::other)?
}

/// Whether `target` names the file described by `source_meta`. The final
/// segment of `target` is followed only with `follow_links`.
async fn is_same_entry(
    source_meta: &std::fs::Metadata,
    target: &Path,
    follow_links: bool,
) -> bool {
    let target_meta = if follow_links {
        tokio::fs::metadata(target).await
    } else {
        tokio::fs::symlink_metadata(target).await
    };
    let Ok(target_meta) = target_meta else {
        return false;
    };
    let source_key = FileMetadata::from_std(source_meta).file_key;
    source_key.is_some() && source_key == FileMetadata::from_std(&target_meta).file_key
}

fn is_cross_device(error: &io::Error) -> bool {
    #[cfg(unix)]
    {
        error.raw_os_error() == Some(libc::EXDEV)
    }
    #[cfg(not(unix))]
    {
        let _ = error;
        false
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    fn scheme(&self) -> &str {
        FILE_SCHEME
    }

    async fn real_path(&self, path: &FsPath) -> io::Result<FsPath> {
        let local = self.local_path(path)?;
        let real = tokio::fs::canonicalize(local).await?;
        Ok(FsPath::file(real))
    }

    async fn check_access(&self, path: &FsPath, modes: &[AccessMode]) -> io::Result<()> {
        let local = self.local_path(path)?.to_path_buf();
        tracing::debug!("check_access {} {:?}", path, modes);

        #[cfg(unix)]
        {
            use nix::unistd::{access, AccessFlags};
            let mut flags = AccessFlags::F_OK;
            for mode in modes {
                flags |= match mode {
                    AccessMode::Read => AccessFlags::R_OK,
                    AccessMode::Write => AccessFlags::W_OK,
                    AccessMode::Execute => AccessFlags::X_OK,
                };
            }
            tokio::task::spawn_blocking(move || access(&local, flags).map_err(io::Error::from))
                .await
                .map_err(io::Error::other)?
        }
        #[cfg(not(unix))]
        {
            let meta = tokio::fs::metadata(&local).await?;
            if modes.contains(&AccessMode::Write) && meta.permissions().readonly() {
                return Err(crate::error::access_denied(path));
            }
            Ok(())
        }
    }

    async fn open_metadata_view(
        &self,
        file: &FsPath,
        options: &[FileMetadataOption],
    ) -> io::Result<Box<dyn FileMetadataView>> {
        let local = self.local_path(file)?.to_path_buf();
        let follow_links = follows_links(options);
        // Surface NotFound at open time
        if follow_links {
            tokio::fs::metadata(&local).await?;
        } else {
            tokio::fs::symlink_metadata(&local).await?;
        }
        Ok(Box::new(LocalMetadataView {
            path: local,
            follow_links,
        }))
    }

    async fn open_content(
        &self,
        file: &FsPath,
        options: &[FileContentOption],
    ) -> io::Result<Box<dyn FileContent>> {
        let mode = ContentOpenMode::from_options(options)?;
        let local = self.local_path(file)?;
        tracing::debug!("open_content {} {:?}", file, mode);

        let mut open_options = tokio::fs::OpenOptions::new();
        open_options
            .read(mode.read)
            .write(mode.write)
            .append(mode.append)
            .truncate(mode.truncate)
            .create(mode.create)
            .create_new(mode.create_new);
        #[cfg(unix)]
        if !mode.follow_links {
            open_options.custom_flags(libc::O_NOFOLLOW);
        }
        #[cfg(not(unix))]
        if !mode.follow_links {
            if let Ok(meta) = tokio::fs::symlink_metadata(local).await {
                if meta.file_type().is_symlink() {
                    return Err(crate::error::invalid_argument(format!(
                        "{} is a symbolic link",
                        file
                    )));
                }
            }
        }

        let handle = open_options.open(local).await?;
        Ok(Box::new(LocalFileContent {
            file: Mutex::new(handle),
            mode,
            path: file.clone(),
        }))
    }

    async fn open_directory_stream(
        &self,
        directory: &FsPath,
        options: &[DirectoryStreamOption],
    ) -> io::Result<Box<dyn DirectoryStream>> {
        let local = self.local_path(directory)?;
        tracing::debug!("open_directory_stream {}", directory);
        let inner = tokio::fs::read_dir(local).await?;
        Ok(Box::new(LocalDirectoryStream {
            inner,
            read_type: reads_type(options),
        }))
    }

    async fn create_directory(
        &self,
        directory: &FsPath,
        options: &[CreateFileOption],
    ) -> io::Result<()> {
        let mode = CreateMode::from_options(options, CreateTarget::Directory)?;
        let local = self.local_path(directory)?;
        tracing::debug!("create_directory {} {:?}", directory, mode);

        if mode.create_parents {
            if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        match tokio::fs::create_dir(local).await {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && mode.allow_existing => {
                if tokio::fs::metadata(local).await?.is_dir() {
                    Ok(())
                } else {
                    Err(e)
                }
            }
            result => result,
        }
    }

    async fn read_symbolic_link(&self, link: &FsPath) -> io::Result<ByteString> {
        let local = self.local_path(link)?;
        let target = tokio::fs::read_link(local).await?;
        Ok(ByteString::from_path(&target))
    }

    async fn create_symbolic_link(
        &self,
        link: &FsPath,
        target: &ByteString,
        options: &[CreateFileOption],
    ) -> io::Result<()> {
        let mode = CreateMode::from_options(options, CreateTarget::SymbolicLink)?;
        let local = self.local_path(link)?;
        tracing::debug!("create_symbolic_link {} -> {}", link, target);

        if mode.create_parents {
            if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        #[cfg(unix)]
        {
            tokio::fs::symlink(target.to_path_buf(), local).await
        }
        #[cfg(not(unix))]
        {
            Err(unsupported("create_symbolic_link"))
        }
    }

    async fn create_hard_link(&self, link: &FsPath, existing: &FsPath) -> io::Result<()> {
        let local_link = self.local_path(link)?;
        let local_existing = self.local_path(existing)?;
        tracing::debug!("create_hard_link {} -> {}", link, existing);
        tokio::fs::hard_link(local_existing, local_link).await
    }

    async fn delete(&self, path: &FsPath) -> io::Result<()> {
        let local = self.local_path(path)?;
        tracing::debug!("delete {}", path);
        let meta = tokio::fs::symlink_metadata(local).await?;
        if meta.is_dir() {
            tokio::fs::remove_dir(local).await
        } else {
            tokio::fs::remove_file(local).await
        }
    }

    async fn is_same_file(&self, path1: &FsPath, path2: &FsPath) -> io::Result<bool> {
        if path1.scheme() != path2.scheme() {
            return Ok(false);
        }
        let local1 = self.local_path(path1)?;
        let local2 = self.local_path(path2)?;
        if local1 == local2 {
            return Ok(true);
        }

        #[cfg(unix)]
        {
            let meta1 = FileMetadata::from_std(&tokio::fs::metadata(local1).await?);
            let meta2 = FileMetadata::from_std(&tokio::fs::metadata(local2).await?);
            Ok(meta1.file_key.is_some() && meta1.file_key == meta2.file_key)
        }
        #[cfg(not(unix))]
        {
            let real1 = tokio::fs::canonicalize(local1).await?;
            let real2 = tokio::fs::canonicalize(local2).await?;
            Ok(real1 == real2)
        }
    }

    async fn copy(
        &self,
        source: &FsPath,
        target: &FsPath,
        options: &[CopyFileOption],
    ) -> io::Result<()> {
        let mode = CopyMode::for_copy(options)?;
        let local_source = self.local_path(source)?;
        let local_target = self.local_path(target)?;
        tracing::debug!("copy {} -> {} {:?}", source, target, mode);

        let source_meta = if mode.follow_links {
            tokio::fs::metadata(local_source).await?
        } else {
            tokio::fs::symlink_metadata(local_source).await?
        };
        if is_same_entry(&source_meta, local_target, true).await {
            return Ok(());
        }
        let target_exists = self
            .check_target(target, local_target, mode.replace_existing)
            .await?;

        match FileType::from_std(source_meta.file_type()) {
            FileType::Directory => {
                if target_exists {
                    // Fails with DirectoryNotEmpty for a populated target
                    self.delete(target).await?;
                }
                tokio::fs::create_dir(local_target).await?;
            }
            FileType::Symlink => {
                if target_exists {
                    self.delete(target).await?;
                }
                return Self::copy_symbolic_link(local_source, local_target).await;
            }
            FileType::File | FileType::Other => {
                if target_exists && tokio::fs::symlink_metadata(local_target).await?.is_dir() {
                    self.delete(target).await?;
                }
                if self.config.atomic_copy {
                    self.copy_file_atomically(local_source, local_target).await?;
                } else {
                    tokio::fs::copy(local_source, local_target).await?;
                }
            }
        }

        if mode.copy_attributes {
            Self::copy_attributes(&source_meta, local_target).await?;
        }
        Ok(())
    }

    async fn move_file(
        &self,
        source: &FsPath,
        target: &FsPath,
        options: &[CopyFileOption],
    ) -> io::Result<()> {
        let mode = CopyMode::for_move(options)?;
        let local_source = self.local_path(source)?;
        let local_target = self.local_path(target)?;
        tracing::debug!("move {} -> {} {:?}", source, target, mode);

        // Links are moved, never followed
        let source_meta = tokio::fs::symlink_metadata(local_source).await?;
        if is_same_entry(&source_meta, local_target, false).await {
            return Ok(());
        }
        self.check_target(target, local_target, mode.replace_existing)
            .await?;

        match tokio::fs::rename(local_source, local_target).await {
            Ok(()) => Ok(()),
            Err(e) if is_cross_device(&e) && !mode.atomic_move && self.config.move_copy_fallback => {
                if source_meta.is_dir() {
                    let mut entries = tokio::fs::read_dir(local_source).await?;
                    if entries.next_entry().await?.is_some() {
                        return Err(e);
                    }
                }
                tracing::warn!(
                    "rename across devices, copying and deleting instead: {} -> {}",
                    source,
                    target
                );
                let copy_options = [
                    CopyFileOption::ReplaceExisting,
                    CopyFileOption::CopyAttributes,
                    CopyFileOption::NoFollowLinks,
                ];
                self.copy(source, target, &copy_options).await?;
                self.delete(source).await
            }
            Err(e) => Err(e),
        }
    }

    async fn open_file_store(&self, path: &FsPath) -> io::Result<Box<dyn FileStore>> {
        let local = self.local_path(path)?.to_path_buf();
        let root = tokio::task::spawn_blocking(move || find_mount_root(&local))
            .await
            .map_err(io::Error::other)??;
        Ok(Box::new(LocalFileStore {
            name: root.display().to_string(),
            root,
        }))
    }
}

/// Topmost ancestor of `path` on the same device
fn find_mount_root(path: &Path) -> io::Result<PathBuf> {
    let path = std::fs::canonicalize(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let device = std::fs::metadata(&path)?.dev();
        let mut root = path.clone();
        for ancestor in path.ancestors().skip(1) {
            match std::fs::metadata(ancestor) {
                Ok(meta) if meta.dev() == device => root = ancestor.to_path_buf(),
                _ => break,
            }
        }
        Ok(root)
    }
    #[cfg(not(unix))]
    {
        Ok(path.ancestors().last().unwrap_or(path.as_path()).to_path_buf())
    }
}

// ============================================================================
// Handles
// ============================================================================

struct LocalMetadataView {
    path: PathBuf,
    follow_links: bool,
}

impl LocalMetadataView {
    async fn std_metadata(&self) -> io::Result<std::fs::Metadata> {
        if self.follow_links {
            tokio::fs::metadata(&self.path).await
        } else {
            tokio::fs::symlink_metadata(&self.path).await
        }
    }

    /// Updates go through the link target; refuse them on a link itself
    async fn ensure_updatable(&self) -> io::Result<std::fs::Metadata> {
        let meta = self.std_metadata().await?;
        if meta.file_type().is_symlink() {
            return Err(unsupported("updating symbolic link attributes"));
        }
        Ok(meta)
    }
}

#[async_trait]
impl FileMetadataView for LocalMetadataView {
    async fn read_metadata(&self) -> io::Result<FileMetadata> {
        Ok(FileMetadata::from_std(&self.std_metadata().await?))
    }

    async fn set_modified(&self, time: SystemTime) -> io::Result<()> {
        self.ensure_updatable().await?;
        set_modified_blocking(self.path.clone(), time).await
    }

    async fn set_permissions(&self, permissions: FilePermissions) -> io::Result<()> {
        let meta = self.ensure_updatable().await?;
        let mut perms = meta.permissions();
        permissions.apply_to(&mut perms);
        tokio::fs::set_permissions(&self.path, perms).await
    }
}

struct LocalFileContent {
    file: Mutex<tokio::fs::File>,
    mode: ContentOpenMode,
    path: FsPath,
}

#[async_trait]
impl FileContent for LocalFileContent {
    async fn read_at(&self, position: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.mode.ensure_readable(&self.path)?;
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(position)).await?;
        file.read(buf).await
    }

    async fn write_at(&self, position: u64, buf: &[u8]) -> io::Result<usize> {
        self.mode.ensure_writable(&self.path)?;
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(position)).await?;
        file.write_all(buf).await?;
        file.flush().await?;
        Ok(buf.len())
    }

    async fn size(&self) -> io::Result<u64> {
        let file = self.file.lock().await;
        Ok(file.metadata().await?.len())
    }

    async fn set_size(&self, size: u64) -> io::Result<()> {
        self.mode.ensure_writable(&self.path)?;
        let file = self.file.lock().await;
        file.set_len(size).await
    }

    async fn sync(&self) -> io::Result<()> {
        let file = self.file.lock().await;
        file.sync_all().await
    }
}

impl Drop for LocalFileContent {
    fn drop(&mut self) {
        tracing::trace!("released content {}", self.path);
    }
}

struct LocalDirectoryStream {
    inner: tokio::fs::ReadDir,
    read_type: bool,
}

#[async_trait]
impl DirectoryStream for LocalDirectoryStream {
    async fn read(&mut self) -> io::Result<Option<DirectoryEntry>> {
        let Some(entry) = self.inner.next_entry().await? else {
            return Ok(None);
        };
        let mut directory_entry = DirectoryEntry::new(entry.file_name());
        if self.read_type {
            directory_entry =
                directory_entry.with_file_type(FileType::from_std(entry.file_type().await?));
        }
        Ok(Some(directory_entry))
    }
}

struct LocalFileStore {
    root: PathBuf,
    name: String,
}

#[async_trait]
impl FileStore for LocalFileStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &str {
        "local"
    }

    #[cfg(unix)]
    #[allow(clippy::unnecessary_cast)]
    async fn read_metadata(&self) -> io::Result<FileStoreMetadata> {
        use nix::sys::statvfs::{statvfs, FsFlags};

        let root = self.root.clone();
        let stat = tokio::task::spawn_blocking(move || {
            statvfs(root.as_path()).map_err(io::Error::from)
        })
        .await
        .map_err(io::Error::other)??;

        let (fragment_size, block_size) = (stat.fragment_size() as u64, stat.block_size() as u64);
        let unit = if fragment_size > 0 {
            fragment_size
        } else {
            block_size
        };
        Ok(FileStoreMetadata {
            total_space: stat.blocks() as u64 * unit,
            free_space: stat.blocks_free() as u64 * unit,
            available_space: stat.blocks_available() as u64 * unit,
            block_size,
            read_only: stat.flags().contains(FsFlags::ST_RDONLY),
        })
    }

    #[cfg(not(unix))]
    async fn read_metadata(&self) -> io::Result<FileStoreMetadata> {
        let _ = &self.root;
        Err(unsupported("file store metadata"))
    }
}

// ============================================================================
// Tests
// ============================================================================
