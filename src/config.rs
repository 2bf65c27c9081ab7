use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FsConfig {
    #[serde(default)]
    pub local: LocalFsConfig,

    #[serde(default)]
    pub memory: MemoryFsConfig,
}

/// Local disk backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalFsConfig {
    /// Copy regular files through a temporary sibling and rename it into
    /// place, so readers never observe a half-written target
    #[serde(default = "default_true")]
    pub atomic_copy: bool,

    /// When a rename fails because source and target are on different
    /// devices, copy and delete instead (unless `AtomicMove` was requested)
    #[serde(default = "default_true")]
    pub move_copy_fallback: bool,
}

/// In-memory backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFsConfig {
    /// Total bytes of file content the store may hold
    #[serde(default = "default_capacity_bytes")]
    pub capacity_bytes: u64,

    /// Symbolic links followed while resolving one path before giving up
    #[serde(default = "default_max_symlink_depth")]
    pub max_symlink_depth: usize,

    /// Events buffered per watcher before it observes an overflow
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_true() -> bool {
    true
}

fn default_capacity_bytes() -> u64 {
    64 * 1024 * 1024 // 64MB
}

fn default_max_symlink_depth() -> usize {
    40
}

fn default_event_buffer() -> usize {
    256
}

impl Default for LocalFsConfig {
    fn default() -> Self {
        Self {
            atomic_copy: true,
            move_copy_fallback: true,
        }
    }
}

impl Default for MemoryFsConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: default_capacity_bytes(),
            max_symlink_depth: default_max_symlink_depth(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl FsConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: FsConfig =
            serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path.as_ref(), contents).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory.capacity_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "memory.capacity_bytes must be greater than 0".to_string(),
            ));
        }

        if self.memory.max_symlink_depth == 0 {
            return Err(ConfigError::ValidationError(
                "memory.max_symlink_depth must be greater than 0".to_string(),
            ));
        }

        if self.memory.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "memory.event_buffer must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(msg) => write!(f, "IO error: {msg}"),
            ConfigError::ParseError(msg) => write!(f, "Parse error: {msg}"),
            ConfigError::SerializeError(msg) => write!(f, "Serialize error: {msg}"),
            ConfigError::ValidationError(msg) => write!(f, "Validation error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
