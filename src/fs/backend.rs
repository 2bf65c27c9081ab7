use async_trait::async_trait;
use std::io;

use super::content::FileContent;
use super::directory::DirectoryStream;
use super::metadata::FileMetadataView;
use super::store::FileStore;
use crate::byte_string::ByteString;
use crate::error::scheme_mismatch;
use crate::options::{
    AccessMode, CopyFileOption, CreateFileOption, DirectoryStreamOption, FileContentOption,
    FileMetadataOption,
};
use crate::path::FsPath;

/// Async file system trait
///
/// One implementation serves one namespace, identified by `scheme`. The
/// trait only holds the primitive operations; compositions such as
/// `read_metadata`, `open_source`, `open_sink` and `read_directory` are
/// provided for every implementation by `FileSystemExt`.
///
/// Implementations hold no per-call state and may be called concurrently
/// from many tasks. Calls on the same path are not serialized; their
/// ordering is whatever the backend provides.
///
/// Every operation can be cancelled by dropping its future. Handles that
/// were opened before the drop are released as part of it.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Scheme of the namespace served by this file system
    fn scheme(&self) -> &str;

    /// Resolve symbolic links and normalize the path
    ///
    /// # Errors
    ///
    /// `NotFound` if any segment of the path does not exist.
    async fn real_path(&self, path: &FsPath) -> io::Result<FsPath>;

    /// Check that the file exists and the caller has every mode in `modes`
    ///
    /// No side effects on success.
    async fn check_access(&self, path: &FsPath, modes: &[AccessMode]) -> io::Result<()>;

    /// Open a handle for repeated metadata queries and updates on `file`
    async fn open_metadata_view(
        &self,
        file: &FsPath,
        options: &[FileMetadataOption],
    ) -> io::Result<Box<dyn FileMetadataView>>;

    /// Open a handle for positional reads and/or writes on `file`
    ///
    /// # Errors
    ///
    /// `InvalidInput` for contradictory options, checked before the file is
    /// touched.
    async fn open_content(
        &self,
        file: &FsPath,
        options: &[FileContentOption],
    ) -> io::Result<Box<dyn FileContent>>;

    /// Open a cursor over the entries of `directory`
    async fn open_directory_stream(
        &self,
        directory: &FsPath,
        options: &[DirectoryStreamOption],
    ) -> io::Result<Box<dyn DirectoryStream>>;

    /// Create a directory
    ///
    /// # Errors
    ///
    /// `AlreadyExists` unless `AllowExisting` is given and the existing
    /// entry is a directory; `NotFound` if the parent is missing and
    /// `CreateParents` is not given.
    async fn create_directory(
        &self,
        directory: &FsPath,
        options: &[CreateFileOption],
    ) -> io::Result<()>;

    /// Raw target of a symbolic link
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `link` is not a symbolic link.
    async fn read_symbolic_link(&self, link: &FsPath) -> io::Result<ByteString>;

    async fn create_symbolic_link(
        &self,
        link: &FsPath,
        target: &ByteString,
        options: &[CreateFileOption],
    ) -> io::Result<()>;

    async fn create_hard_link(&self, link: &FsPath, existing: &FsPath) -> io::Result<()>;

    /// Remove a file, a symbolic link or an empty directory
    async fn delete(&self, path: &FsPath) -> io::Result<()>;

    /// Whether both paths denote the same underlying file object
    async fn is_same_file(&self, path1: &FsPath, path2: &FsPath) -> io::Result<bool>;

    /// Copy `source` to `target`
    ///
    /// A failed copy may leave partial results behind; atomic replacement
    /// of the target is only provided where the backend supports it.
    async fn copy(
        &self,
        source: &FsPath,
        target: &FsPath,
        options: &[CopyFileOption],
    ) -> io::Result<()>;

    /// Move or rename `source` to `target`
    async fn move_file(
        &self,
        source: &FsPath,
        target: &FsPath,
        options: &[CopyFileOption],
    ) -> io::Result<()>;

    /// The volume containing `path`
    async fn open_file_store(&self, path: &FsPath) -> io::Result<Box<dyn FileStore>>;
}

/// Fail with `InvalidInput` unless `path` belongs to `fs`
pub fn check_scheme(fs: &(impl FileSystem + ?Sized), path: &FsPath) -> io::Result<()> {
    if path.scheme() == fs.scheme() {
        Ok(())
    } else {
        Err(scheme_mismatch(fs.scheme(), path))
    }
}
