//! Size limits and on-disk constants for the command log.

/// Default size of the in-memory command-log ring buffer.
pub const CMDLOG_BUFFER_SIZE: u32 = 100 * 1024 * 1024;

/// Maximum number of bytes grouped into one flush request.
///
/// A flush-queue slot counts its bytes in a `u16`, so this must stay at or
/// below `u16::MAX`.
pub const FLUSH_AUTO_SIZE: u32 = 32 * 1024;

/// Smallest possible serialized record: 8 bytes of header plus 8 bytes of
/// body. The flush-request queue is sized as `buffer_size / RECORD_MIN_SIZE`
/// so it can never run out of slots before the ring runs out of bytes.
pub const RECORD_MIN_SIZE: u32 = 16;

/// Serialized record header length.
pub const HEADER_SIZE: u32 = 8;

/// Upper bound on one serialized record (header plus body).
pub const MAX_LOG_RECORD_SIZE: u32 = 2 * 1024 * 1024;

/// Longest accepted log file path, in bytes.
pub const MAX_FILEPATH_LENGTH: usize = 255;

/// Unix permission bits for newly created log files.
pub const LOG_FILE_MODE: u32 = 0o640;
