//! Worker thread configuration

use spidev_core::env::{env_get_opt, env_get_str};

/// Default thread name prefix; threads are named `"{prefix}-{fd}"`.
pub const DEFAULT_THREAD_PREFIX: &str = "spidev";

/// Configuration for per-handle worker threads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Prefix for worker thread names
    pub thread_name_prefix: String,

    /// Stack size per worker thread (None = std default)
    pub stack_size: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: DEFAULT_THREAD_PREFIX.to_owned(),
            stack_size: None,
        }
    }
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `SPIDEV_THREAD_PREFIX` and `SPIDEV_WORKER_STACK`.
    pub fn from_env() -> Self {
        Self {
            thread_name_prefix: env_get_str("SPIDEV_THREAD_PREFIX", DEFAULT_THREAD_PREFIX),
            stack_size: env_get_opt("SPIDEV_WORKER_STACK"),
        }
    }

    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub(crate) fn thread_name(&self, fd: i32) -> String {
        format!("{}-{}", self.thread_name_prefix, fd)
    }
}
