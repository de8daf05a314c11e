//! Log file pair and the rotation state machine.
//!
//! The checkpoint subsystem drives rotation: it prepares a fresh log file,
//! lets writers dual-write into both files while the checkpoint runs, then
//! completes (or aborts) the handover. States:
//!
//! - `Closed`: before the first `file_prepare`.
//! - `Single`: one live file, no rotation.
//! - `Dual`: a next file is installed; new records tagged for dual write
//!   are flushed to both files.
//! - `Cleanup`: the handover is done and new records flow to the new file,
//!   but pre-rotation bytes still buffered in memory must drain to the
//!   retired file, kept here as `prev`.
//!
//! File handles are `Arc<File>` so the fsync path can hold one across the
//! unlocked fsync call; a file retired mid-fsync stays open until that
//! clone drops, then closes with it.

use crate::disk;
use std::fs::File;
use std::sync::Arc;
use tracing::{debug, info};

/// One live log file and its append progress.
pub(crate) struct FileSlot {
    pub file: Arc<File>,
    pub size: u64,
}

impl FileSlot {
    fn new(file: File) -> Self {
        FileSlot {
            file: Arc::new(file),
            size: 0,
        }
    }
}

/// The file pair, in one of the four rotation states.
pub(crate) enum LogFiles {
    Closed,
    Single { curr: FileSlot },
    Dual { curr: FileSlot, next: FileSlot },
    Cleanup { curr: FileSlot, prev: FileSlot },
}

impl LogFiles {
    pub(crate) fn curr(&self) -> Option<&FileSlot> {
        match self {
            LogFiles::Closed => None,
            LogFiles::Single { curr }
            | LogFiles::Dual { curr, .. }
            | LogFiles::Cleanup { curr, .. } => Some(curr),
        }
    }

    pub(crate) fn curr_mut(&mut self) -> Option<&mut FileSlot> {
        match self {
            LogFiles::Closed => None,
            LogFiles::Single { curr }
            | LogFiles::Dual { curr, .. }
            | LogFiles::Cleanup { curr, .. } => Some(curr),
        }
    }

    pub(crate) fn curr_size(&self) -> u64 {
        self.curr().map(|slot| slot.size).unwrap_or(0)
    }

    /// Whether a next file is installed (rotation running, not yet
    /// completed or aborted).
    pub(crate) fn rotation_in_progress(&self) -> bool {
        matches!(self, LogFiles::Dual { .. })
    }

    /// Install a freshly opened log file: the live file when none exists,
    /// otherwise the rotation target.
    pub(crate) fn install(&mut self, file: File) {
        match std::mem::replace(self, LogFiles::Closed) {
            LogFiles::Closed => {
                *self = LogFiles::Single {
                    curr: FileSlot::new(file),
                };
            }
            LogFiles::Single { curr } => {
                *self = LogFiles::Dual {
                    curr,
                    next: FileSlot::new(file),
                };
            }
            LogFiles::Dual { .. } => {
                panic!("log file prepared while a rotation is already in progress");
            }
            LogFiles::Cleanup { .. } => {
                panic!("log file prepared while a rotation cleanup is still draining");
            }
        }
    }

    /// Hand the log over to the next file.
    ///
    /// When pre-rotation bytes are still queued, the retired file stays
    /// installed as `prev` until the cleanup window drains; otherwise it
    /// drops (and closes) here.
    pub(crate) fn complete_rotation(&mut self, window_pending: bool) {
        match std::mem::replace(self, LogFiles::Closed) {
            LogFiles::Dual { curr, next } => {
                if window_pending {
                    debug!("log handover with pending pre-rotation bytes");
                    *self = LogFiles::Cleanup { curr: next, prev: curr };
                } else {
                    debug!("log handover, retiring previous file");
                    *self = LogFiles::Single { curr: next };
                }
            }
            other => *self = other,
        }
    }

    /// Abandon the rotation target, staying on the current file.
    pub(crate) fn abort_rotation(&mut self) {
        if let LogFiles::Dual { curr, .. } = std::mem::replace(self, LogFiles::Closed) {
            debug!("log rotation aborted, next file dropped");
            *self = LogFiles::Single { curr };
        }
    }

    /// Retire `prev` once the cleanup window has drained.
    pub(crate) fn finish_cleanup(&mut self) {
        if let LogFiles::Cleanup { curr, .. } = std::mem::replace(self, LogFiles::Closed) {
            debug!("cleanup window drained, retiring pre-rotation file");
            *self = LogFiles::Single { curr };
        }
    }

    /// Drop the live file after a failed recovery; the caller decides
    /// whether to continue without it.
    pub(crate) fn close_curr(&mut self) {
        *self = LogFiles::Closed;
    }

    /// Append `bytes` to the current file, and to the rotation target as
    /// well when `dual_write` is set. Write failures are unrecoverable.
    pub(crate) fn append(&mut self, bytes: &[u8], dual_write: bool) {
        match self {
            LogFiles::Single { curr } | LogFiles::Cleanup { curr, .. } => {
                append_slot(curr, bytes);
            }
            LogFiles::Dual { curr, next } => {
                append_slot(curr, bytes);
                if dual_write {
                    append_slot(next, bytes);
                }
            }
            LogFiles::Closed => panic!("flush with no log file prepared"),
        }
    }

    /// Append cleanup-window bytes: always to the pre-rotation file, and
    /// to the new file as well when they were tagged for dual write.
    pub(crate) fn append_cleanup(&mut self, bytes: &[u8], dual_write: bool) {
        match self {
            LogFiles::Cleanup { curr, prev } => {
                append_slot(prev, bytes);
                if dual_write {
                    append_slot(curr, bytes);
                }
            }
            _ => panic!("cleanup flush without a retired file installed"),
        }
    }

    /// Handles for the fsync path: the current file, plus the rotation
    /// target when one is installed.
    pub(crate) fn sync_handles(&self) -> Option<(Arc<File>, Option<Arc<File>>)> {
        match self {
            LogFiles::Closed => None,
            LogFiles::Single { curr } | LogFiles::Cleanup { curr, .. } => {
                Some((Arc::clone(&curr.file), None))
            }
            LogFiles::Dual { curr, next } => {
                Some((Arc::clone(&curr.file), Some(Arc::clone(&next.file))))
            }
        }
    }

    /// Fsync and close the live file at shutdown.
    ///
    /// Callers must complete or abort any rotation first.
    pub(crate) fn finalize(&mut self) {
        assert!(
            !self.rotation_in_progress(),
            "log file finalized while a rotation is in progress"
        );
        if let Some(slot) = self.curr() {
            disk::sync_or_abort(&slot.file);
            info!(size = slot.size, "command log file closed");
        }
        *self = LogFiles::Closed;
    }
}

fn append_slot(slot: &mut FileSlot, bytes: &[u8]) {
    if let Err(e) = disk::write_fully(&slot.file, bytes) {
        disk::fatal("log file write", &e);
    }
    slot.size += bytes.len() as u64;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir, name: &str) -> File {
        crate::disk::open_log_file(&dir.path().join(name)).unwrap()
    }

    #[test]
    fn test_install_first_then_next() {
        let dir = TempDir::new().unwrap();
        let mut files = LogFiles::Closed;
        assert!(files.curr().is_none());

        files.install(open(&dir, "a.log"));
        assert!(files.curr().is_some());
        assert!(!files.rotation_in_progress());

        files.install(open(&dir, "b.log"));
        assert!(files.rotation_in_progress());
    }

    #[test]
    fn test_append_dual_writes_both_files() {
        let dir = TempDir::new().unwrap();
        let mut files = LogFiles::Closed;
        files.install(open(&dir, "a.log"));
        files.append(b"one", false);

        files.install(open(&dir, "b.log"));
        files.append(b"two", true);
        files.append(b"xxx", false);

        assert_eq!(std::fs::read(dir.path().join("a.log")).unwrap(), b"onetwoxxx");
        assert_eq!(std::fs::read(dir.path().join("b.log")).unwrap(), b"two");
    }

    #[test]
    fn test_complete_rotation_without_window() {
        let dir = TempDir::new().unwrap();
        let mut files = LogFiles::Closed;
        files.install(open(&dir, "a.log"));
        files.install(open(&dir, "b.log"));

        files.complete_rotation(false);
        assert!(!files.rotation_in_progress());
        files.append(b"new", false);
        assert_eq!(std::fs::read(dir.path().join("b.log")).unwrap(), b"new");
        assert_eq!(std::fs::read(dir.path().join("a.log")).unwrap(), b"");
    }

    #[test]
    fn test_cleanup_routes_to_retired_file() {
        let dir = TempDir::new().unwrap();
        let mut files = LogFiles::Closed;
        files.install(open(&dir, "a.log"));
        files.install(open(&dir, "b.log"));
        files.complete_rotation(true);

        // Pre-rotation bytes: non-dual reach only the retired file, dual
        // reach both.
        files.append_cleanup(b"old", false);
        files.append_cleanup(b"both", true);
        files.finish_cleanup();
        files.append(b"new", false);

        assert_eq!(std::fs::read(dir.path().join("a.log")).unwrap(), b"oldboth");
        assert_eq!(std::fs::read(dir.path().join("b.log")).unwrap(), b"bothnew");
    }

    #[test]
    fn test_abort_rotation_keeps_current() {
        let dir = TempDir::new().unwrap();
        let mut files = LogFiles::Closed;
        files.install(open(&dir, "a.log"));
        files.install(open(&dir, "b.log"));
        files.abort_rotation();

        assert!(!files.rotation_in_progress());
        files.append(b"kept", true);
        assert_eq!(std::fs::read(dir.path().join("a.log")).unwrap(), b"kept");
        assert_eq!(std::fs::read(dir.path().join("b.log")).unwrap(), b"");
    }

    #[test]
    #[should_panic(expected = "rotation is already in progress")]
    fn test_prepare_during_rotation_panics() {
        let dir = TempDir::new().unwrap();
        let mut files = LogFiles::Closed;
        files.install(open(&dir, "a.log"));
        files.install(open(&dir, "b.log"));
        files.install(open(&dir, "c.log"));
    }

    #[test]
    #[should_panic(expected = "rotation is in progress")]
    fn test_finalize_during_rotation_panics() {
        let dir = TempDir::new().unwrap();
        let mut files = LogFiles::Closed;
        files.install(open(&dir, "a.log"));
        files.install(open(&dir, "b.log"));
        files.finalize();
    }

    #[test]
    fn test_sync_handles_per_state() {
        let dir = TempDir::new().unwrap();
        let mut files = LogFiles::Closed;
        assert!(files.sync_handles().is_none());

        files.install(open(&dir, "a.log"));
        let (_, next) = files.sync_handles().unwrap();
        assert!(next.is_none());

        files.install(open(&dir, "b.log"));
        let (_, next) = files.sync_handles().unwrap();
        assert!(next.is_some());
    }
}
