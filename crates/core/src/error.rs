//! Error types for the command-log subsystem.
//!
//! We use `thiserror` for automatic `Display` and `Error` implementations.
//!
//! Only lifecycle and recovery failures surface as `Err` values. Failures
//! on the hot write/flush path (short writes, fsync errors on a live log
//! file) break the write-ahead contract itself and are escalated to a
//! process abort by the durability layer instead of being returned.

use std::io;
use thiserror::Error;

/// Result alias for command-log operations.
pub type CmdLogResult<T> = Result<T, CmdLogError>;

/// Errors surfaced by command-log lifecycle and recovery operations.
#[derive(Debug, Error)]
pub enum CmdLogError {
    /// Ring buffer or flush-queue allocation failed, or record replay
    /// ran out of memory during recovery.
    #[error("out of memory")]
    OutOfMemory,

    /// A log file could not be opened or read.
    #[error("log file I/O failed: {source}")]
    IoFailed {
        /// Underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// The log file path exceeds the accepted length.
    #[error("log file path exceeds {} bytes", crate::limits::MAX_FILEPATH_LENGTH)]
    PathTooLong,

    /// The operation needs a prepared log file and none is installed.
    #[error("no log file has been prepared")]
    NotPrepared,

    /// Recovery found a record whose claimed body length exceeds the
    /// record size bound. The file is closed; the caller decides whether
    /// to proceed without it.
    #[error("corrupt record at offset {offset}: body length {body_length} exceeds the record size bound")]
    RecoveryCorrupt {
        /// File offset of the record's header.
        offset: u64,
        /// Body length claimed by the header.
        body_length: u32,
    },

    /// The flush thread could not be spawned.
    #[error("failed to start the log flush thread: {source}")]
    ThreadStartFailed {
        /// Underlying spawn error.
        source: io::Error,
    },

    /// The supplied configuration failed validation.
    #[error("invalid configuration: {detail}")]
    InvalidConfig {
        /// What the validation rejected.
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: CmdLogError = io_err.into();
        assert!(matches!(err, CmdLogError::IoFailed { .. }));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_corrupt_display_carries_context() {
        let err = CmdLogError::RecoveryCorrupt {
            offset: 48,
            body_length: 99_000_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("48"));
        assert!(msg.contains("99000000"));
    }
}
