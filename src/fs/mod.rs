//! File system abstraction
//!
//! `FileSystem` is the contract every backend implements; `FileSystemExt`
//! layers the derived compositions on top of it. Backends:
//!
//! - `LocalFileSystem` (scheme `file`): the local disk through `tokio::fs`
//! - `MemoryFileSystem` (scheme `memory`): an in-memory tree with change events
//! - `SlowFileSystem`: a delaying, counting wrapper around any other backend
//!
//! `FileSystemRegistry` routes paths to backends by scheme.

pub mod backend;
pub mod content;
pub mod directory;
pub mod ext;
pub mod local;
pub mod memory;
pub mod metadata;
pub mod registry;
pub mod slow;
pub mod store;

pub use backend::{check_scheme, FileSystem};
pub use content::{transfer, AsyncSink, AsyncSource, ContentSink, ContentSource, FileContent};
pub use directory::{DirectoryEntry, DirectoryStream};
pub use ext::FileSystemExt;
pub use local::LocalFileSystem;
pub use memory::{FileEventReceiver, MemoryFileSystem};
pub use metadata::{FileKey, FileMetadata, FileMetadataView, FilePermissions, FileType};
pub use registry::FileSystemRegistry;
pub use slow::{BackendMetrics, SlowFileSystem, SlowFsConfig};
pub use store::{FileStore, FileStoreMetadata};
