//! Command-log configuration.

use cinder_core::limits::{CMDLOG_BUFFER_SIZE, FLUSH_AUTO_SIZE, RECORD_MIN_SIZE};
use std::time::Duration;

/// Command-log configuration parameters.
#[derive(Debug, Clone)]
pub struct CmdLogConfig {
    /// In-memory ring buffer size in bytes (default: 100 MiB).
    ///
    /// Writers never see a full ring; they force a flush and retry when a
    /// record does not fit, so a smaller ring trades throughput for memory.
    pub buffer_size: u32,

    /// How long the flush thread sleeps when there is nothing to flush
    /// (default: 10 ms). Writers wake it early when work arrives.
    pub flush_wait: Duration,
}

impl Default for CmdLogConfig {
    fn default() -> Self {
        CmdLogConfig {
            buffer_size: CMDLOG_BUFFER_SIZE,
            flush_wait: Duration::from_millis(10),
        }
    }
}

impl CmdLogConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ring buffer size (builder pattern).
    pub fn with_buffer_size(mut self, size: u32) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the flush thread idle wait (builder pattern).
    pub fn with_flush_wait(mut self, wait: Duration) -> Self {
        self.flush_wait = wait;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), CmdLogConfigError> {
        if self.buffer_size < 2 * FLUSH_AUTO_SIZE {
            return Err(CmdLogConfigError::BufferTooSmall);
        }
        if self.buffer_size % RECORD_MIN_SIZE != 0 {
            return Err(CmdLogConfigError::BufferNotAligned);
        }
        Ok(())
    }

    /// Create a configuration sized for tests (1 MiB ring, short waits).
    pub fn for_testing() -> Self {
        CmdLogConfig {
            buffer_size: 1024 * 1024,
            flush_wait: Duration::from_millis(1),
        }
    }
}

/// Command-log configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CmdLogConfigError {
    /// Ring must hold at least two maximum-size flush requests.
    #[error("ring buffer must be at least two flush units")]
    BufferTooSmall,

    /// Ring size must be a multiple of the minimum record size so the
    /// flush queue capacity divides evenly.
    #[error("ring buffer size must be a multiple of the minimum record size")]
    BufferNotAligned,
}
