//! Slow file system wrapper for testing
//!
//! Decorates any `FileSystem` with configurable delays to simulate slow
//! I/O (network drives, slow disks) and counts every call and every handle
//! opened and released. Tests use it to observe cancellation and to check
//! that compositions release what they open.

use async_trait::async_trait;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use super::backend::FileSystem;
use super::content::FileContent;
use super::directory::{DirectoryEntry, DirectoryStream};
use super::metadata::{FileMetadata, FileMetadataView, FilePermissions};
use super::store::{FileStore, FileStoreMetadata};
use crate::byte_string::ByteString;
use crate::options::{
    AccessMode, CopyFileOption, CreateFileOption, DirectoryStreamOption, FileContentOption,
    FileMetadataOption,
};
use crate::path::FsPath;

/// Configuration for slow file system simulation
#[derive(Debug, Clone)]
pub struct SlowFsConfig {
    /// Delay for real_path, check_access and is_same_file
    pub resolve_delay: Duration,
    /// Delay for opening a metadata view
    pub metadata_delay: Duration,
    /// Delay for opening file content
    pub open_content_delay: Duration,
    /// Delay for opening a directory stream
    pub open_directory_delay: Duration,
    /// Delay for each entry read from a directory stream
    pub read_entry_delay: Duration,
    /// Delay for creating, linking, deleting, copying and moving
    pub mutation_delay: Duration,
}

impl SlowFsConfig {
    /// Create a config with uniform delay for all operations
    pub fn uniform(delay: Duration) -> Self {
        Self {
            resolve_delay: delay,
            metadata_delay: delay,
            open_content_delay: delay,
            open_directory_delay: delay,
            read_entry_delay: delay,
            mutation_delay: delay,
        }
    }

    /// Create a config with no delays (useful as a baseline)
    pub fn none() -> Self {
        Self::uniform(Duration::ZERO)
    }

    /// Create a config simulating a slow network file system
    pub fn slow_network() -> Self {
        Self {
            resolve_delay: Duration::from_millis(50),
            metadata_delay: Duration::from_millis(50),
            open_content_delay: Duration::from_millis(100),
            open_directory_delay: Duration::from_millis(500),
            read_entry_delay: Duration::from_millis(5),
            mutation_delay: Duration::from_millis(100),
        }
    }

    /// Create a config simulating a very slow disk
    pub fn slow_disk() -> Self {
        Self {
            resolve_delay: Duration::from_millis(20),
            metadata_delay: Duration::from_millis(20),
            open_content_delay: Duration::from_millis(50),
            open_directory_delay: Duration::from_millis(200),
            read_entry_delay: Duration::from_millis(2),
            mutation_delay: Duration::from_millis(50),
        }
    }
}

impl Default for SlowFsConfig {
    fn default() -> Self {
        Self::none()
    }
}

/// Metrics tracking for file system operations
#[derive(Debug, Clone, Default)]
pub struct BackendMetrics {
    pub real_path_calls: usize,
    pub check_access_calls: usize,
    pub open_metadata_view_calls: usize,
    pub open_content_calls: usize,
    pub open_directory_stream_calls: usize,
    /// Directory entries read through streams
    pub entries_read: usize,
    /// create_directory, create_symbolic_link and create_hard_link calls
    pub create_calls: usize,
    pub read_symbolic_link_calls: usize,
    pub delete_calls: usize,
    pub is_same_file_calls: usize,
    pub copy_calls: usize,
    pub move_calls: usize,
    pub open_file_store_calls: usize,
    /// Handles successfully opened (views, contents, streams, stores)
    pub handles_opened: usize,
    /// Handles released by drop
    pub handles_closed: usize,
    /// Total time spent in artificial delays
    pub total_delay_time: Duration,
}

impl BackendMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all metrics to zero
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Get total number of file system calls
    pub fn total_calls(&self) -> usize {
        self.real_path_calls
            + self.check_access_calls
            + self.open_metadata_view_calls
            + self.open_content_calls
            + self.open_directory_stream_calls
            + self.create_calls
            + self.read_symbolic_link_calls
            + self.delete_calls
            + self.is_same_file_calls
            + self.copy_calls
            + self.move_calls
            + self.open_file_store_calls
    }

    /// Handles opened and not yet released
    pub fn open_handles(&self) -> usize {
        self.handles_opened.saturating_sub(self.handles_closed)
    }
}

type SharedMetrics = Arc<Mutex<BackendMetrics>>;

// Handles record their release from `Drop`, so the metrics sit behind a
// blocking lock that is never held across an await.
fn lock(metrics: &Mutex<BackendMetrics>) -> MutexGuard<'_, BackendMetrics> {
    metrics.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn add_delay(metrics: &Mutex<BackendMetrics>, delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
        lock(metrics).total_delay_time += delay;
    }
}

/// Slow file system wrapper for testing
///
/// Wraps any `FileSystem` and adds configurable delays to each operation.
/// Handles returned by the wrapper are wrapped in turn so their release is
/// counted.
pub struct SlowFileSystem {
    /// The underlying real file system
    inner: Arc<dyn FileSystem>,
    /// Configuration for delays
    config: SlowFsConfig,
    /// Metrics tracking
    metrics: SharedMetrics,
}

impl std::fmt::Debug for SlowFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlowFileSystem")
            .field("scheme", &self.inner.scheme())
            .field("config", &self.config)
            .finish()
    }
}

impl SlowFileSystem {
    /// Create a new slow file system
    pub fn new(inner: Arc<dyn FileSystem>, config: SlowFsConfig) -> Self {
        Self {
            inner,
            config,
            metrics: Arc::new(Mutex::new(BackendMetrics::new())),
        }
    }

    /// Create with uniform delay for all operations
    pub fn with_uniform_delay(inner: Arc<dyn FileSystem>, delay: Duration) -> Self {
        Self::new(inner, SlowFsConfig::uniform(delay))
    }

    /// Get a snapshot of current metrics
    pub fn metrics(&self) -> BackendMetrics {
        lock(&self.metrics).clone()
    }

    /// Reset metrics to zero
    pub fn reset_metrics(&self) {
        lock(&self.metrics).reset();
    }

    /// Get a clone of the metrics Arc for sharing
    pub fn metrics_arc(&self) -> Arc<Mutex<BackendMetrics>> {
        Arc::clone(&self.metrics)
    }

    async fn enter(&self, delay: Duration, count: impl FnOnce(&mut BackendMetrics)) {
        add_delay(&self.metrics, delay).await;
        count(&mut *lock(&self.metrics));
    }

    fn track(&self) -> HandleTracker {
        lock(&self.metrics).handles_opened += 1;
        HandleTracker {
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// Counts a handle as released when dropped
struct HandleTracker {
    metrics: SharedMetrics,
}

impl Drop for HandleTracker {
    fn drop(&mut self) {
        lock(&self.metrics).handles_closed += 1;
    }
}

#[async_trait]
impl FileSystem for SlowFileSystem {
    fn scheme(&self) -> &str {
        self.inner.scheme()
    }

    async fn real_path(&self, path: &FsPath) -> io::Result<FsPath> {
        self.enter(self.config.resolve_delay, |m| m.real_path_calls += 1)
            .await;
        self.inner.real_path(path).await
    }

    async fn check_access(&self, path: &FsPath, modes: &[AccessMode]) -> io::Result<()> {
        self.enter(self.config.resolve_delay, |m| m.check_access_calls += 1)
            .await;
        self.inner.check_access(path, modes).await
    }

    async fn open_metadata_view(
        &self,
        file: &FsPath,
        options: &[FileMetadataOption],
    ) -> io::Result<Box<dyn FileMetadataView>> {
        self.enter(self.config.metadata_delay, |m| {
            m.open_metadata_view_calls += 1
        })
        .await;
        let inner = self.inner.open_metadata_view(file, options).await?;
        Ok(Box::new(SlowMetadataView {
            inner,
            _tracker: self.track(),
        }))
    }

    async fn open_content(
        &self,
        file: &FsPath,
        options: &[FileContentOption],
    ) -> io::Result<Box<dyn FileContent>> {
        self.enter(self.config.open_content_delay, |m| m.open_content_calls += 1)
            .await;
        let inner = self.inner.open_content(file, options).await?;
        Ok(Box::new(SlowFileContent {
            inner,
            _tracker: self.track(),
        }))
    }

    async fn open_directory_stream(
        &self,
        directory: &FsPath,
        options: &[DirectoryStreamOption],
    ) -> io::Result<Box<dyn DirectoryStream>> {
        self.enter(self.config.open_directory_delay, |m| {
            m.open_directory_stream_calls += 1
        })
        .await;
        let inner = self.inner.open_directory_stream(directory, options).await?;
        Ok(Box::new(SlowDirectoryStream {
            inner,
            read_entry_delay: self.config.read_entry_delay,
            metrics: Arc::clone(&self.metrics),
            _tracker: self.track(),
        }))
    }

    async fn create_directory(
        &self,
        directory: &FsPath,
        options: &[CreateFileOption],
    ) -> io::Result<()> {
        self.enter(self.config.mutation_delay, |m| m.create_calls += 1)
            .await;
        self.inner.create_directory(directory, options).await
    }

    async fn read_symbolic_link(&self, link: &FsPath) -> io::Result<ByteString> {
        self.enter(self.config.resolve_delay, |m| {
            m.read_symbolic_link_calls += 1
        })
        .await;
        self.inner.read_symbolic_link(link).await
    }

    async fn create_symbolic_link(
        &self,
        link: &FsPath,
        target: &ByteString,
        options: &[CreateFileOption],
    ) -> io::Result<()> {
        self.enter(self.config.mutation_delay, |m| m.create_calls += 1)
            .await;
        self.inner.create_symbolic_link(link, target, options).await
    }

    async fn create_hard_link(&self, link: &FsPath, existing: &FsPath) -> io::Result<()> {
        self.enter(self.config.mutation_delay, |m| m.create_calls += 1)
            .await;
        self.inner.create_hard_link(link, existing).await
    }

    async fn delete(&self, path: &FsPath) -> io::Result<()> {
        self.enter(self.config.mutation_delay, |m| m.delete_calls += 1)
            .await;
        self.inner.delete(path).await
    }

    async fn is_same_file(&self, path1: &FsPath, path2: &FsPath) -> io::Result<bool> {
        self.enter(self.config.resolve_delay, |m| m.is_same_file_calls += 1)
            .await;
        self.inner.is_same_file(path1, path2).await
    }

    async fn copy(
        &self,
        source: &FsPath,
        target: &FsPath,
        options: &[CopyFileOption],
    ) -> io::Result<()> {
        self.enter(self.config.mutation_delay, |m| m.copy_calls += 1)
            .await;
        self.inner.copy(source, target, options).await
    }

    async fn move_file(
        &self,
        source: &FsPath,
        target: &FsPath,
        options: &[CopyFileOption],
    ) -> io::Result<()> {
        self.enter(self.config.mutation_delay, |m| m.move_calls += 1)
            .await;
        self.inner.move_file(source, target, options).await
    }

    async fn open_file_store(&self, path: &FsPath) -> io::Result<Box<dyn FileStore>> {
        self.enter(self.config.resolve_delay, |m| m.open_file_store_calls += 1)
            .await;
        let inner = self.inner.open_file_store(path).await?;
        Ok(Box::new(SlowFileStore {
            inner,
            _tracker: self.track(),
        }))
    }
}

struct SlowMetadataView {
    inner: Box<dyn FileMetadataView>,
    _tracker: HandleTracker,
}

#[async_trait]
impl FileMetadataView for SlowMetadataView {
    async fn read_metadata(&self) -> io::Result<FileMetadata> {
        self.inner.read_metadata().await
    }

    async fn set_modified(&self, time: SystemTime) -> io::Result<()> {
        self.inner.set_modified(time).await
    }

    async fn set_permissions(&self, permissions: FilePermissions) -> io::Result<()> {
        self.inner.set_permissions(permissions).await
    }
}

struct SlowFileContent {
    inner: Box<dyn FileContent>,
    _tracker: HandleTracker,
}

#[async_trait]
impl FileContent for SlowFileContent {
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

struct SlowDirectoryStream {
    inner: Box<dyn DirectoryStream>,
    read_entry_delay: Duration,
    metrics: SharedMetrics,
    _tracker: HandleTracker,
}

#[async_trait]
impl DirectoryStream for SlowDirectoryStream {
    async fn read(&mut self) -> io::Result<Option<DirectoryEntry>> {
        add_delay(&self.metrics, self.read_entry_delay).await;
        let entry = self.inner.read().await?;
        if entry.is_some() {
            lock(&self.metrics).entries_read += 1;
        }
        Ok(entry)
    }
}

struct SlowFileStore {
    inner: Box<dyn FileStore>,
    _tracker: HandleTracker,
}

#[async_trait]
impl FileStore for SlowFileStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn type_name(&self) -> &str {
        self.inner.type_name()
    }

    async fn read_metadata(&self) -> io::Result<FileStoreMetadata> {
        self.inner.read_metadata().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileSystemExt, LocalFileSystem, MemoryFileSystem};
    use std::time::Instant;
    use tempfile::TempDir;

    fn memory() -> Arc<dyn FileSystem> {
        Arc::new(MemoryFileSystem::new())
    }

    #[tokio::test]
    async fn test_slow_backend_adds_delay() {
        let temp_dir = TempDir::new().unwrap();
        let dir = FsPath::file(temp_dir.path());

        let local = Arc::new(LocalFileSystem::new());
        let slow_config = SlowFsConfig {
            open_directory_delay: Duration::from_millis(100),
            ..SlowFsConfig::none()
        };
        let slow = SlowFileSystem::new(local, slow_config);

        let start = Instant::now();
        let _ = slow.read_directory(&dir, &[]).await;
        let elapsed = start.elapsed();

        // Should take at least 100ms due to artificial delay
        assert!(
            elapsed >= Duration::from_millis(100),
            "Expected at least 100ms delay, got {:?}",
            elapsed
        );

        let metrics = slow.metrics();
        assert_eq!(metrics.open_directory_stream_calls, 1);
        assert!(metrics.total_delay_time >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_metrics_tracking() {
        let slow = SlowFileSystem::new(memory(), SlowFsConfig::none());
        let root = FsPath::memory("/");

        let _ = slow.read_directory(&root, &[]).await;
        let _ = slow.exists(&root).await;
        let _ = slow.real_path(&root).await;

        let metrics = slow.metrics();
        assert_eq!(metrics.open_directory_stream_calls, 1);
        assert_eq!(metrics.check_access_calls, 1);
        assert_eq!(metrics.real_path_calls, 1);
        assert_eq!(metrics.total_calls(), 3);
    }

    #[tokio::test]
    async fn test_handles_counted_on_release() {
        let slow = SlowFileSystem::new(memory(), SlowFsConfig::none());
        let file = FsPath::memory("/f");

        slow.write_file(&file, b"abc").await.unwrap();
        let _ = slow.read_metadata(&file, &[]).await.unwrap();

        let source = slow.open_source(&file, &[]).await.unwrap();
        assert_eq!(slow.metrics().open_handles(), 1);
        drop(source);

        let metrics = slow.metrics();
        assert_eq!(metrics.handles_opened, 3);
        assert_eq!(metrics.handles_closed, 3);
    }

    #[tokio::test]
    async fn test_failed_open_is_not_a_handle() {
        let slow = SlowFileSystem::new(memory(), SlowFsConfig::none());
        let err = slow
            .read_metadata(&FsPath::memory("/missing"), &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        let metrics = slow.metrics();
        assert_eq!(metrics.open_metadata_view_calls, 1);
        assert_eq!(metrics.handles_opened, 0);
    }

    #[tokio::test]
    async fn test_reset_metrics() {
        let slow = SlowFileSystem::new(memory(), SlowFsConfig::none());
        let root = FsPath::memory("/");

        let _ = slow.read_directory(&root, &[]).await;
        let _ = slow.exists(&root).await;

        let metrics_before = slow.metrics();
        assert!(metrics_before.total_calls() > 0);

        slow.reset_metrics();

        let metrics_after = slow.metrics();
        assert_eq!(metrics_after.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_preset_configs() {
        let network_config = SlowFsConfig::slow_network();
        assert_eq!(
            network_config.open_directory_delay,
            Duration::from_millis(500)
        );

        let disk_config = SlowFsConfig::slow_disk();
        assert_eq!(disk_config.open_directory_delay, Duration::from_millis(200));

        let none_config = SlowFsConfig::none();
        assert_eq!(none_config.read_entry_delay, Duration::ZERO);

        let slow = SlowFileSystem::new(memory(), disk_config);
        assert_eq!(slow.scheme(), "memory");
    }
}
