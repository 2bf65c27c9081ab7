// Common test utilities

#[cfg(test)]
#[allow(dead_code)]
pub mod recording_fs;
#[cfg(test)]
#[allow(dead_code)]
pub mod tracing;
