//! File system double that records every handle it hands out
//!
//! Delegates to a `MemoryFileSystem`. Metadata reads can be made to fail on
//! demand, to check that compositions release their handles on error paths.

use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use fresh_fs::fs::{
    DirectoryEntry, DirectoryStream, FileContent, FileMetadata, FileMetadataView,
    FilePermissions, FileStore, FileSystem, MemoryFileSystem,
};
use fresh_fs::options::{
    AccessMode, CopyFileOption, CreateFileOption, DirectoryStreamOption, FileContentOption,
    FileMetadataOption,
};
use fresh_fs::{ByteString, FsPath};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    MetadataView,
    Content,
    DirectoryStream,
}

/// Opens and closes per handle kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recording {
    pub metadata_views_opened: usize,
    pub metadata_views_closed: usize,
    pub contents_opened: usize,
    pub contents_closed: usize,
    pub streams_opened: usize,
    pub streams_closed: usize,
}

impl Recording {
    fn record(&mut self, kind: HandleKind, opened: bool) {
        let counter = match (kind, opened) {
            (HandleKind::MetadataView, true) => &mut self.metadata_views_opened,
            (HandleKind::MetadataView, false) => &mut self.metadata_views_closed,
            (HandleKind::Content, true) => &mut self.contents_opened,
            (HandleKind::Content, false) => &mut self.contents_closed,
            (HandleKind::DirectoryStream, true) => &mut self.streams_opened,
            (HandleKind::DirectoryStream, false) => &mut self.streams_closed,
        };
        *counter += 1;
    }

    pub fn total_opened(&self) -> usize {
        self.metadata_views_opened + self.contents_opened + self.streams_opened
    }

    pub fn total_closed(&self) -> usize {
        self.metadata_views_closed + self.contents_closed + self.streams_closed
    }
}

type SharedRecording = Arc<Mutex<Recording>>;

struct Tracker {
    recording: SharedRecording,
    kind: HandleKind,
}

impl Tracker {
    fn open(recording: &SharedRecording, kind: HandleKind) -> Self {
        recording.lock().unwrap().record(kind, true);
        Self {
            recording: Arc::clone(recording),
            kind,
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.recording.lock().unwrap().record(self.kind, false);
    }
}

#[derive(Clone, Default)]
pub struct RecordingFileSystem {
    inner: MemoryFileSystem,
    recording: SharedRecording,
    fail_metadata_reads: Arc<AtomicBool>,
}

impl RecordingFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// The backing file system, for setting up fixtures without recording
    pub fn inner(&self) -> &MemoryFileSystem {
        &self.inner
    }

    pub fn recording(&self) -> Recording {
        self.recording.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        *self.recording.lock().unwrap() = Recording::default();
    }

    /// Make every `read_metadata` on views opened from now on fail
    pub fn fail_metadata_reads(&self, fail: bool) {
        self.fail_metadata_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl FileSystem for RecordingFileSystem {
    fn scheme(&self) -> &str {
        self.inner.scheme()
    }

    async fn real_path(&self, path: &FsPath) -> io::Result<FsPath> {
        self.inner.real_path(path).await
    }

    async fn check_access(&self, path: &FsPath, modes: &[AccessMode]) -> io::Result<()> {
        self.inner.check_access(path, modes).await
    }

    async fn open_metadata_view(
        &self,
        file: &FsPath,
        options: &[FileMetadataOption],
    ) -> io::Result<Box<dyn FileMetadataView>> {
        let inner = self.inner.open_metadata_view(file, options).await?;
        Ok(Box::new(RecordingMetadataView {
            inner,
            fail_reads: self.fail_metadata_reads.load(Ordering::SeqCst),
            _tracker: Tracker::open(&self.recording, HandleKind::MetadataView),
        }))
    }

    async fn open_content(
        &self,
        file: &FsPath,
        options: &[FileContentOption],
    ) -> io::Result<Box<dyn FileContent>> {
        let inner = self.inner.open_content(file, options).await?;
        Ok(Box::new(RecordingContent {
            inner,
            _tracker: Tracker::open(&self.recording, HandleKind::Content),
        }))
    }

    async fn open_directory_stream(
        &self,
        directory: &FsPath,
        options: &[DirectoryStreamOption],
    ) -> io::Result<Box<dyn DirectoryStream>> {
        let inner = self.inner.open_directory_stream(directory, options).await?;
        Ok(Box::new(RecordingStream {
            inner,
            _tracker: Tracker::open(&self.recording, HandleKind::DirectoryStream),
        }))
    }

    async fn create_directory(
        &self,
        directory: &FsPath,
        options: &[CreateFileOption],
    ) -> io::Result<()> {
        self.inner.create_directory(directory, options).await
    }

    async fn read_symbolic_link(&self, link: &FsPath) -> io::Result<ByteString> {
        self.inner.read_symbolic_link(link).await
    }

    async fn create_symbolic_link(
        &self,
        link: &FsPath,
        target: &ByteString,
        options: &[CreateFileOption],
    ) -> io::Result<()> {
        self.inner.create_symbolic_link(link, target, options).await
    }

    async fn create_hard_link(&self, link: &FsPath, existing: &FsPath) -> io::Result<()> {
        self.inner.create_hard_link(link, existing).await
    }

    async fn delete(&self, path: &FsPath) -> io::Result<()> {
        self.inner.delete(path).await
    }

    async fn is_same_file(&self, path1: &FsPath, path2: &FsPath) -> io::Result<bool> {
        self.inner.is_same_file(path1, path2).await
    }

    async fn copy(
        &self,
        source: &FsPath,
        target: &FsPath,
        options: &[CopyFileOption],
    ) -> io::Result<()> {
        self.inner.copy(source, target, options).await
    }

    async fn move_file(
        &self,
        source: &FsPath,
        target: &FsPath,
        options: &[CopyFileOption],
    ) -> io::Result<()> {
        self.inner.move_file(source, target, options).await
    }

    async fn open_file_store(&self, path: &FsPath) -> io::Result<Box<dyn FileStore>> {
        self.inner.open_file_store(path).await
    }
}

struct RecordingMetadataView {
    inner: Box<dyn FileMetadataView>,
    fail_reads: bool,
    _tracker: Tracker,
}

#[async_trait]
impl FileMetadataView for RecordingMetadataView {
    async fn read_metadata(&self) -> io::Result<FileMetadata> {
        if self.fail_reads {
            return Err(io::Error::other("injected metadata failure"));
        }
        self.inner.read_metadata().await
    }

    async fn set_modified(&self, time: SystemTime) -> io::Result<()> {
        self.inner.set_modified(time).await
    }

    async fn set_permissions(&self, permissions: FilePermissions) -> io::Result<()> {
        self.inner.set_permissions(permissions).await
    }
}

struct RecordingContent {
    inner: Box<dyn FileContent>,
    _tracker: Tracker,
}

#[async_trait]
impl FileContent for RecordingContent {
    async fn read_at(&self, position: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read_at(position, buf).await
    }

    async fn write_at(&self, position: u64, buf: &[u8]) -> io::Result<usize> {
        self.inner.write_at(position, buf).await
    }

    async fn size(&self) -> io::Result<u64> {
        self.inner.size().await
    }

    async fn set_size(&self, size: u64) -> io::Result<()> {
        self.inner.set_size(size).await
    }

    async fn sync(&self) -> io::Result<()> {
        self.inner.sync().await
    }
}

struct RecordingStream {
    inner: Box<dyn DirectoryStream>,
    _tracker: Tracker,
}

#[async_trait]
impl DirectoryStream for RecordingStream {
    async fn read(&mut self) -> io::Result<Option<DirectoryEntry>> {
        self.inner.read().await
    }
}
