use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use super::backend::FileSystem;
use super::content::transfer;
use super::ext::FileSystemExt;
use super::local::LocalFileSystem;
use super::memory::MemoryFileSystem;
use crate::config::FsConfig;
use crate::error::{already_exists, unsupported};
use crate::options::{CopyFileOption, CopyMode, FileContentOption, FileMetadataOption};
use crate::path::FsPath;

/// Routes paths to the file system serving their scheme
///
/// Same-scheme requests are handed straight to the owning file system;
/// copies between schemes are streamed from a source into a sink.
#[derive(Clone, Default)]
pub struct FileSystemRegistry {
    file_systems: HashMap<String, Arc<dyn FileSystem>>,
}

impl fmt::Debug for FileSystemRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<_> = self.file_systems.keys().collect();
        schemes.sort();
        f.debug_struct("FileSystemRegistry")
            .field("schemes", &schemes)
            .finish()
    }
}

impl FileSystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding a local and an in-memory file system built from
    /// `config`
    pub fn with_config(config: &FsConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LocalFileSystem::with_config(config.local.clone())));
        registry.register(Arc::new(MemoryFileSystem::with_config(
            config.memory.clone(),
        )));
        registry
    }

    /// Register `fs` under its scheme, returning the file system it replaces
    pub fn register(&mut self, fs: Arc<dyn FileSystem>) -> Option<Arc<dyn FileSystem>> {
        let scheme = fs.scheme().to_string();
        tracing::debug!("registering file system '{}'", scheme);
        self.file_systems.insert(scheme, fs)
    }

    pub fn get(&self, scheme: &str) -> Option<&Arc<dyn FileSystem>> {
        self.file_systems.get(scheme)
    }

    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.file_systems.keys().map(String::as_str)
    }

    /// The file system owning `path`
    ///
    /// # Errors
    ///
    /// `Unsupported` if no file system is registered for the path's scheme.
    pub fn for_path(&self, path: &FsPath) -> io::Result<&Arc<dyn FileSystem>> {
        self.get(path.scheme())
            .ok_or_else(|| unsupported(&format!("scheme '{}'", path.scheme())))
    }

    /// Identity comparison that also accepts paths of different schemes,
    /// which are never the same file
    pub async fn is_same_file(&self, path1: &FsPath, path2: &FsPath) -> io::Result<bool> {
        if path1.scheme() != path2.scheme() {
            return Ok(false);
        }
        self.for_path(path1)?.is_same_file(path1, path2).await
    }

    /// Copy `source` to `target`, which may belong to different schemes
    ///
    /// Across schemes only regular files and directories can be copied; a
    /// directory copy creates an empty directory. `CopyAttributes` carries
    /// the modification time and permission bits over.
    pub async fn copy_across(
        &self,
        source: &FsPath,
        target: &FsPath,
        options: &[CopyFileOption],
    ) -> io::Result<()> {
        let mode = CopyMode::for_copy(options)?;
        let source_fs = self.for_path(source)?;
        if source.scheme() == target.scheme() {
            return source_fs.copy(source, target, options).await;
        }
        let target_fs = self.for_path(target)?;
        tracing::debug!("copy across {} -> {} {:?}", source, target, mode);

        let metadata_options: &[FileMetadataOption] = if mode.follow_links {
            &[]
        } else {
            &[FileMetadataOption::NoFollowLinks]
        };
        let metadata = source_fs.read_metadata(source, metadata_options).await?;

        if metadata.is_dir() {
            match target_fs.read_metadata(target, &[]).await {
                Ok(existing) if !mode.replace_existing || !existing.is_dir() => {
                    return Err(already_exists(target));
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    target_fs.create_directory(target, &[]).await?;
                }
                Err(e) => return Err(e),
            }
        } else if metadata.is_file() {
            let mut source_stream = source_fs.open_source(source, &[]).await?;
            let sink_options: &[FileContentOption] = if mode.replace_existing {
                &[
                    FileContentOption::Write,
                    FileContentOption::TruncateExisting,
                    FileContentOption::Create,
                ]
            } else {
                &[FileContentOption::Write, FileContentOption::CreateNew]
            };
            let mut sink = target_fs.open_sink(target, sink_options).await?;
            let copied = transfer(&mut source_stream, &mut sink).await?;
            sink.sync().await?;
            tracing::trace!("copied {} bytes", copied);
        } else {
            return Err(unsupported("copying links or special files across schemes"));
        }

        if mode.copy_attributes {
            let view = target_fs.open_metadata_view(target, &[]).await?;
            if let Some(modified) = metadata.modified {
                view.set_modified(modified).await?;
            }
            if let Some(permissions) = metadata.permissions {
                view.set_permissions(permissions).await?;
            }
        }
        Ok(())
    }
}
