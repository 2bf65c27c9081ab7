//! Compositions layered over the primitive `FileSystem` operations
//!
//! These are implemented once, against the trait, and are available on
//! every file system (including `dyn FileSystem`) through a blanket
//! implementation. Each composition that opens a handle internally owns
//! it in a local binding, so the handle is dropped on every exit path:
//! success, error, or the future being dropped mid-operation.

use async_trait::async_trait;
use std::io;

use super::backend::FileSystem;
use super::content::{AsyncSink, AsyncSource, ContentSink, ContentSource};
use super::metadata::FileMetadata;
use crate::options::{
    check_sink_options, check_source_options, DirectoryStreamOption, FileContentOption,
    FileMetadataOption, OPEN_SINK_OPTIONS_DEFAULT,
};
use crate::path::FsPath;

#[async_trait]
pub trait FileSystemExt: FileSystem {
    /// Open a metadata view, read it once and release it
    async fn read_metadata(
        &self,
        file: &FsPath,
        options: &[FileMetadataOption],
    ) -> io::Result<FileMetadata> {
        let view = self.open_metadata_view(file, options).await?;
        view.read_metadata().await
    }

    /// Open `file` as a read-only byte source
    ///
    /// `Write` and `Append` are rejected before anything is opened.
    async fn open_source(
        &self,
        file: &FsPath,
        options: &[FileContentOption],
    ) -> io::Result<ContentSource> {
        check_source_options(options)?;
        let content = self.open_content(file, options).await?;
        Ok(ContentSource::new(content))
    }

    /// Open `file` as a byte sink
    ///
    /// An empty option set means `Write`, `TruncateExisting`, `Create`.
    /// `Read` is rejected, as is a set with neither `Write` nor `Append`,
    /// before anything is opened.
    async fn open_sink(
        &self,
        file: &FsPath,
        options: &[FileContentOption],
    ) -> io::Result<ContentSink> {
        let options = if options.is_empty() {
            OPEN_SINK_OPTIONS_DEFAULT
        } else {
            options
        };
        check_sink_options(options)?;
        let content = self.open_content(file, options).await?;
        Ok(ContentSink::new(content))
    }

    /// Full paths of every entry in `directory`, in stream order
    async fn read_directory(
        &self,
        directory: &FsPath,
        options: &[DirectoryStreamOption],
    ) -> io::Result<Vec<FsPath>> {
        let mut stream = self.open_directory_stream(directory, options).await?;
        let mut paths = Vec::new();
        while let Some(entry) = stream.read().await? {
            paths.push(directory.resolve(&entry.name));
        }
        Ok(paths)
    }

    /// Read the whole content of `file`
    async fn read_file(&self, file: &FsPath) -> io::Result<Vec<u8>> {
        let mut source = self.open_source(file, &[]).await?;
        let mut data = Vec::new();
        source.read_to_end(&mut data).await?;
        Ok(data)
    }

    /// Replace the content of `file` with `data`, creating it if needed
    async fn write_file(&self, file: &FsPath, data: &[u8]) -> io::Result<()> {
        let mut sink = self.open_sink(file, &[]).await?;
        sink.write_all(data).await?;
        sink.flush().await
    }

    /// Check if path exists
    ///
    /// Only `NotFound` means absent; any other failure is returned.
    async fn exists(&self, path: &FsPath) -> io::Result<bool> {
        match self.check_access(path, &[]).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Blanket implementation: every FileSystem gets the compositions
impl<T: FileSystem + ?Sized> FileSystemExt for T {}
