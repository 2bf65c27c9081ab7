//! File stores: the volume or mount a file lives on

use async_trait::async_trait;
use std::io;

/// Capacity information of a file store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStoreMetadata {
    pub total_space: u64,
    pub free_space: u64,
    /// Space available to unprivileged users
    pub available_space: u64,
    pub block_size: u64,
    pub read_only: bool,
}

impl FileStoreMetadata {
    pub fn used_space(&self) -> u64 {
        self.total_space.saturating_sub(self.free_space)
    }
}

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Human readable name, such as the mount point
    fn name(&self) -> &str;

    /// Backend specific type, such as `local` or `memory`
    fn type_name(&self) -> &str;

    async fn read_metadata(&self) -> io::Result<FileStoreMetadata>;
}
