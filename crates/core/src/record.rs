//! Record header contract and the codec seam.
//!
//! The command-log buffer treats record bodies as opaque bytes; the engine
//! injects a [`RecordCodec`] that owns the full byte layout. Only the fixed
//! 8-byte header is a shared contract, because recovery has to read the body
//! length before it can hand the record back to the codec.
//!
//! ## Header Format
//!
//! ```text
//! +----------------+
//! | Kind (u8)      |  Command family (engine-defined)
//! +----------------+
//! | Op (u8)        |  Operation within the family (engine-defined)
//! +----------------+
//! | Reserved (u16) |  Zero on write, ignored on read
//! +----------------+
//! | BodyLen (u32)  |  Body bytes following the header, little-endian
//! +----------------+
//! ```

use crate::limits::HEADER_SIZE;
use crate::lsn::LogSn;
use thiserror::Error;

/// Fixed-layout header preceding every record body in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Command family tag (engine-defined).
    pub kind: u8,
    /// Operation tag within the family (engine-defined).
    pub op: u8,
    /// Reserved; written as zero.
    pub reserved: u16,
    /// Number of body bytes following the header.
    pub body_length: u32,
}

impl RecordHeader {
    /// Serialized header length in bytes.
    pub const SIZE: usize = HEADER_SIZE as usize;

    /// Encode into the fixed little-endian layout.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.kind;
        out[1] = self.op;
        out[2..4].copy_from_slice(&self.reserved.to_le_bytes());
        out[4..8].copy_from_slice(&self.body_length.to_le_bytes());
        out
    }

    /// Decode from the fixed little-endian layout.
    pub fn decode(bytes: [u8; Self::SIZE]) -> Self {
        RecordHeader {
            kind: bytes[0],
            op: bytes[1],
            reserved: u16::from_le_bytes([bytes[2], bytes[3]]),
            body_length: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    /// Total serialized record length: header plus body.
    pub fn total_length(&self) -> u32 {
        HEADER_SIZE + self.body_length
    }
}

/// A command record awaiting serialization into the log buffer.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Record header; `body_length` must equal `body.len()`.
    pub header: RecordHeader,
    /// Opaque body bytes, laid out by the codec.
    pub body: Vec<u8>,
}

impl LogRecord {
    /// Build a record over `body`, filling in the header length.
    pub fn new(kind: u8, op: u8, body: Vec<u8>) -> Self {
        let header = RecordHeader {
            kind,
            op,
            reserved: 0,
            body_length: body.len() as u32,
        };
        LogRecord { header, body }
    }

    /// Total serialized length: header plus body.
    pub fn total_length(&self) -> u32 {
        self.header.total_length()
    }
}

/// Errors surfaced by the codec's redo hook during recovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RedoError {
    /// Replay could not allocate; recovery cannot continue.
    #[error("record replay ran out of memory")]
    OutOfMemory,

    /// Replay rejected the record. Recovery logs the failure and moves on.
    #[error("record replay failed: {0}")]
    Rejected(String),
}

/// The injected capability owning the record byte layout.
///
/// All record bytes entering or leaving the command log pass through the
/// codec: the write path hands it an exact-length slice of the ring to
/// serialize into, and recovery hands it each `(header, body)` pair to
/// replay against engine state.
///
/// # Thread Safety
///
/// Codecs must be `Send + Sync`; serialization runs under the write lock
/// from many foreground threads.
pub trait RecordCodec: Send + Sync {
    /// Serialize `record` into `out`.
    ///
    /// `out` is exactly `record.total_length()` bytes and must be filled
    /// completely: header first, body following.
    fn serialize(&self, record: &LogRecord, out: &mut [u8]);

    /// Replay one recovered record against engine state.
    fn redo(&self, header: &RecordHeader, body: &[u8]) -> Result<(), RedoError>;
}

/// Caller-owned handle stamped with the position assigned to its record.
///
/// Pass a waiter to `record_write` to learn the record's log sequence
/// number, then hand that position to `buffer_flush` to block until the
/// record has reached the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogWaiter {
    /// The position assigned to the record, valid after `record_write`.
    pub lsn: LogSn,
}

impl LogWaiter {
    /// A waiter with an unset position.
    pub fn new() -> Self {
        Self::default()
    }
}
