//! Asynchronous, pluggable file system abstraction

pub mod byte_string;
pub mod cancel;
pub mod config;
pub mod error;
pub mod event;
pub mod fs;
pub mod options;
pub mod path;
pub mod tracing_setup;

pub use byte_string::ByteString;
pub use cancel::{CancellationSource, CancellationToken, Cancelled};
pub use config::{ConfigError, FsConfig, LocalFsConfig, MemoryFsConfig};
pub use event::{FileEvent, FileEventKind};
pub use fs::{FileSystem, FileSystemExt};
pub use path::FsPath;
