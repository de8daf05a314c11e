//! Test support for exercising the command log without a real engine.
//!
//! `PlainCodec` is a byte-faithful [`RecordCodec`]: it serializes the
//! header in its fixed layout followed by the body verbatim, records every
//! record handed to its redo hook, and can inject redo failures at chosen
//! points for recovery tests.

use cinder_core::{LogRecord, RecordCodec, RecordHeader, RedoError};
use parking_lot::Mutex;

/// Byte-faithful codec with a recording redo hook.
#[derive(Default)]
pub struct PlainCodec {
    redone: Mutex<Vec<(RecordHeader, Vec<u8>)>>,
    fail_at: Mutex<Option<(usize, RedoError)>>,
}

impl PlainCodec {
    /// A codec that replays everything successfully.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `index`-th redo call (0-based) fail with `err`.
    pub fn fail_redo_at(&self, index: usize, err: RedoError) {
        *self.fail_at.lock() = Some((index, err));
    }

    /// Records replayed so far, in replay order.
    pub fn redone(&self) -> Vec<(RecordHeader, Vec<u8>)> {
        self.redone.lock().clone()
    }

    /// Number of records replayed so far.
    pub fn redone_count(&self) -> usize {
        self.redone.lock().len()
    }
}

impl RecordCodec for PlainCodec {
    fn serialize(&self, record: &LogRecord, out: &mut [u8]) {
        out[..RecordHeader::SIZE].copy_from_slice(&record.header.encode());
        out[RecordHeader::SIZE..].copy_from_slice(&record.body);
    }

    fn redo(&self, header: &RecordHeader, body: &[u8]) -> Result<(), RedoError> {
        let seen = self.redone.lock().len();
        let mut fail_at = self.fail_at.lock();
        if let Some((index, _)) = &*fail_at {
            if seen == *index {
                let (_, err) = fail_at.take().unwrap();
                return Err(err);
            }
        }
        drop(fail_at);
        self.redone.lock().push((*header, body.to_vec()));
        Ok(())
    }
}

/// The exact bytes `PlainCodec` lays down for `record`.
pub fn encode_record(record: &LogRecord) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(record.total_length() as usize);
    bytes.extend_from_slice(&record.header.encode());
    bytes.extend_from_slice(&record.body);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_matches_encode_record() {
        let codec = PlainCodec::new();
        let record = LogRecord::new(2, 5, b"payload!".to_vec());
        let mut out = vec![0u8; record.total_length() as usize];
        codec.serialize(&record, &mut out);
        assert_eq!(out, encode_record(&record));
    }

    #[test]
    fn test_redo_records_in_order() {
        let codec = PlainCodec::new();
        let a = LogRecord::new(1, 0, b"aaaa".to_vec());
        let b = LogRecord::new(1, 1, b"bbbb".to_vec());
        codec.redo(&a.header, &a.body).unwrap();
        codec.redo(&b.header, &b.body).unwrap();

        let redone = codec.redone();
        assert_eq!(redone.len(), 2);
        assert_eq!(redone[0].1, b"aaaa");
        assert_eq!(redone[1].1, b"bbbb");
    }

    #[test]
    fn test_injected_failure_fires_once_at_index() {
        let codec = PlainCodec::new();
        codec.fail_redo_at(1, RedoError::Rejected("boom".into()));

        let rec = LogRecord::new(1, 0, b"12345678".to_vec());
        assert!(codec.redo(&rec.header, &rec.body).is_ok());
        assert!(codec.redo(&rec.header, &rec.body).is_err());
        // The injection disarms after firing; replay continues.
        assert!(codec.redo(&rec.header, &rec.body).is_ok());
        assert_eq!(codec.redone_count(), 2);
    }
}
