//! The command log: write path, flush path, fsync path, rotation, recovery.
//!
//! One `CommandLog` owns the ring buffer, the flush-request queue, the log
//! file pair and the position cursors. Foreground threads serialize records
//! into the ring under the write lock; a single flush thread drains the
//! queue to disk under the flush lock; any thread may fsync on demand.
//!
//! ## Lock order
//!
//! 1. flush lock (`files`): file pair, disk writes, flush scratch
//! 2. write lock (`ring`): byte ring, flush-request queue, write cursor
//! 3. `flush_lsn` / `fsync_lsn`: leaf locks around the two cursors
//!
//! When both the flush and write locks are needed, the flush lock comes
//! first. The write path honors this by dropping the write lock before it
//! forces a flush to free ring space.
//!
//! ## Position cursors
//!
//! `nxt_write_lsn` (next byte to reserve) >= `nxt_flush_lsn` (bytes handed
//! to the OS) >= `nxt_fsync_lsn` (bytes durable on disk), compared
//! lexicographically across file rotations.

use crate::buffer::LogBuffer;
use crate::config::CmdLogConfig;
use crate::disk;
use crate::file::LogFiles;
use crate::flusher::{Flusher, RunState};
use crate::fqueue::FlushQueue;
use cinder_core::limits::{HEADER_SIZE, MAX_FILEPATH_LENGTH, MAX_LOG_RECORD_SIZE, RECORD_MIN_SIZE};
use cinder_core::{CmdLogError, CmdLogResult, LogRecord, LogSn, LogWaiter, RecordCodec, RecordHeader, RedoError};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

/// State guarded by the write lock.
struct RingState {
    buf: LogBuffer,
    fque: FlushQueue,
    nxt_write_lsn: LogSn,
}

/// State guarded by the flush lock.
struct FlushState {
    files: LogFiles,
    /// Bytes selected for one disk write are copied here under the write
    /// lock, so the write itself runs without it.
    scratch: Vec<u8>,
}

/// The command-log buffer subsystem.
///
/// Created once at engine startup and shared behind an `Arc`; the flush
/// thread holds a clone for its lifetime.
pub struct CommandLog {
    codec: Arc<dyn RecordCodec>,
    flush_wait: Duration,
    files: Mutex<FlushState>,
    ring: Mutex<RingState>,
    flush_lsn: Mutex<LogSn>,
    fsync_lsn: Mutex<LogSn>,
    flusher: Flusher,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
}

impl CommandLog {
    /// Allocate the ring and flush-request queue.
    pub fn new(config: CmdLogConfig, codec: Arc<dyn RecordCodec>) -> CmdLogResult<Self> {
        config
            .validate()
            .map_err(|e| CmdLogError::InvalidConfig {
                detail: e.to_string(),
            })?;

        let buf = LogBuffer::new(config.buffer_size)?;
        let fque = FlushQueue::new(config.buffer_size / RECORD_MIN_SIZE)?;

        info!(
            buffer_size = config.buffer_size,
            "command log buffer initialized"
        );

        Ok(CommandLog {
            codec,
            flush_wait: config.flush_wait,
            files: Mutex::new(FlushState {
                files: LogFiles::Closed,
                scratch: Vec::new(),
            }),
            ring: Mutex::new(RingState {
                buf,
                fque,
                nxt_write_lsn: LogSn::start(),
            }),
            flush_lsn: Mutex::new(LogSn::start()),
            fsync_lsn: Mutex::new(LogSn::start()),
            flusher: Flusher::new(),
            flush_thread: Mutex::new(None),
        })
    }

    /// Serialize `record` into the ring and queue it for flushing.
    ///
    /// If `waiter` is given it is stamped with the record's assigned
    /// position; pass that position to [`buffer_flush`](Self::buffer_flush)
    /// to block until the record reaches the OS. `dual_write` tags the
    /// record for replication into the rotation target while a rotation is
    /// in progress.
    ///
    /// Blocks when the ring has no room, flushing ahead until the record
    /// fits.
    pub fn record_write(
        &self,
        record: &LogRecord,
        waiter: Option<&mut LogWaiter>,
        dual_write: bool,
    ) {
        let total = record.total_length();
        debug_assert_eq!(record.header.body_length as usize, record.body.len());
        debug_assert!(total <= MAX_LOG_RECORD_SIZE);

        let mut ring = self.ring.lock();
        assert!(
            total < ring.buf.size(),
            "record of {total} bytes cannot fit the ring"
        );

        loop {
            let reserve = ring.buf.reserve(total);
            if reserve.wrapped {
                // Keep each flush request contiguous in memory: a request
                // never spans the wrap.
                ring.fque.close_tail();
            }
            if reserve.ready {
                break;
            }
            // No room. The flusher drains behind `head`; force one flush
            // and retry. Lock order is flush before write, so the write
            // lock drops first.
            drop(ring);
            {
                let mut fs = self.files.lock();
                if self.flush_once(&mut fs, false) == 0 {
                    // The only unflushed bytes sit in the open tail slot;
                    // close and flush it so the retry can make room.
                    self.flush_once(&mut fs, true);
                }
            }
            ring = self.ring.lock();
        }

        if let Some(waiter) = waiter {
            waiter.lsn = ring.nxt_write_lsn;
        }

        self.codec.serialize(record, ring.buf.tail_slice(total));
        ring.buf.advance_tail(total);
        ring.nxt_write_lsn.roffset += total as u64;
        ring.fque.push(total, dual_write);
        let pending = ring.fque.has_pending();
        drop(ring);

        if pending {
            self.flusher.wakeup();
        }
    }

    /// Block until the flush cursor has moved past `upto_lsn`, or until
    /// every written byte is flushed when `upto_lsn` names the end of the
    /// log.
    ///
    /// `upto_lsn` must not lie beyond the written log.
    pub fn buffer_flush(&self, upto_lsn: LogSn) {
        loop {
            let mut fs = self.files.lock();
            if *self.flush_lsn.lock() > upto_lsn {
                return;
            }
            let nflush = self.flush_once(&mut fs, true);
            if nflush == 0 {
                // Nothing left in the ring: the cursor sits exactly on
                // the end of the written log.
                let write_lsn = self.ring.lock().nxt_write_lsn;
                assert!(
                    *self.flush_lsn.lock() == write_lsn,
                    "flush target {upto_lsn} lies beyond the written log"
                );
                return;
            }
            if *self.flush_lsn.lock() > upto_lsn {
                return;
            }
            // Drop and retake the flush lock between rounds so the flush
            // thread and other waiters can interleave.
        }
    }

    /// Fsync the live log file(s) and advance the durable cursor.
    ///
    /// The durable cursor lands on the flush position sampled before the
    /// fsync; bytes flushed while the fsync runs wait for the next call.
    pub fn file_sync(&self) {
        let (now_flush_lsn, curr, next) = {
            let fs = self.files.lock();
            let handles = fs
                .files
                .sync_handles()
                .expect("file_sync with no log file prepared");
            (*self.flush_lsn.lock(), handles.0, handles.1)
        };

        // The fsync runs outside the flush lock; the cloned handles keep
        // the files open even if a rotation retires them meanwhile.
        disk::sync_or_abort(&curr);
        if let Some(next) = &next {
            disk::sync_or_abort(next);
        }

        *self.fsync_lsn.lock() = now_flush_lsn;
        // Handles drop here; a file retired during the fsync closes now.
    }

    /// Snapshot of the flush cursor.
    pub fn get_flush_lsn(&self) -> LogSn {
        *self.flush_lsn.lock()
    }

    /// Snapshot of the durable cursor.
    pub fn get_fsync_lsn(&self) -> LogSn {
        *self.fsync_lsn.lock()
    }

    /// Install a log file: the live file when none exists, otherwise the
    /// rotation target (entering dual-write).
    pub fn file_prepare(&self, path: &Path) -> CmdLogResult<()> {
        if path.as_os_str().len() > MAX_FILEPATH_LENGTH {
            return Err(CmdLogError::PathTooLong);
        }
        let mut fs = self.files.lock();
        let file = match disk::open_log_file(path) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), %e, "failed to open the command log file");
                return Err(CmdLogError::IoFailed { source: e });
            }
        };
        fs.files.install(file);
        info!(path = %path.display(), "command log file prepared");
        Ok(())
    }

    /// Finish or abort a rotation started by
    /// [`file_prepare`](Self::file_prepare).
    ///
    /// On success the next file becomes the live file, the write cursor
    /// moves to the new file's origin, and any pre-rotation bytes still
    /// buffered become the cleanup window: the flusher drains them to the
    /// retired file (and dual-write bytes to the new file as well) before
    /// the flush cursor follows into the new file.
    ///
    /// On failure the next file drops and queued dual-write tags are
    /// cleared.
    ///
    /// No-op when no rotation is in progress (the first checkpoint
    /// installs the live file directly).
    pub fn complete_dual_write(&self, success: bool) {
        let mut fs = self.files.lock();
        if !fs.files.rotation_in_progress() {
            return;
        }
        if success {
            let window_pending;
            {
                let mut ring = self.ring.lock();
                ring.fque.close_tail();
                ring.fque.mark_dual_write_end();
                window_pending = ring.fque.has_pending();
                ring.nxt_write_lsn.filenum += 1;
                ring.nxt_write_lsn.roffset = 0;
            }
            fs.files.complete_rotation(window_pending);
            info!(
                cleanup_pending = window_pending,
                "dual write completed, log rotated"
            );
        } else {
            {
                let mut ring = self.ring.lock();
                ring.fque.clear_dual_flags();
            }
            fs.files.abort_rotation();
            info!("dual write aborted");
        }
    }

    /// Size of the live log file, or 0 while a cleanup window still
    /// drains (the size keeps moving until the backlog lands).
    pub fn file_getsize(&self) -> u64 {
        let fs = self.files.lock();
        let ring = self.ring.lock();
        if ring.fque.in_cleanup() {
            0
        } else {
            fs.files.curr_size()
        }
    }

    /// Replay the live log file through the codec's redo hook.
    ///
    /// Reads `(header, body)` pairs until the end of the file. A torn tail
    /// (short header or short body) ends the replay cleanly: the file
    /// truncates to the last complete record so the next append overwrites
    /// the torn bytes. A body length beyond the record size bound is
    /// corruption; the file closes and an error returns. On success all
    /// three cursors continue from the recovered size.
    pub fn file_apply(&self) -> CmdLogResult<()> {
        let mut fs = self.files.lock();
        let (file, size) = {
            let slot = fs.files.curr_mut().ok_or(CmdLogError::NotPrepared)?;
            let file = Arc::clone(&slot.file);
            let size = file.metadata()?.len();
            slot.size = size;
            (file, size)
        };

        info!(target: "cinder::recovery", size, "applying command log file");
        if size == 0 {
            info!(target: "cinder::recovery", "command log file is empty");
            return Ok(());
        }

        match self.replay_file(&file, size) {
            Ok(valid_end) => {
                if valid_end < size {
                    // Drop the torn tail; position stays at the new end.
                    if let Err(e) = file.set_len(valid_end) {
                        fs.files.close_curr();
                        return Err(CmdLogError::IoFailed { source: e });
                    }
                }
                if let Some(slot) = fs.files.curr_mut() {
                    slot.size = valid_end;
                }
                {
                    let mut ring = self.ring.lock();
                    ring.nxt_write_lsn.roffset = valid_end;
                    let filenum = ring.nxt_write_lsn.filenum;
                    *self.flush_lsn.lock() = LogSn::new(filenum, valid_end);
                    *self.fsync_lsn.lock() = LogSn::new(filenum, valid_end);
                }
                info!(target: "cinder::recovery", size = valid_end, "command log applied");
                Ok(())
            }
            Err(e) => {
                warn!(target: "cinder::recovery", %e, "command log apply failed");
                fs.files.close_curr();
                Err(e)
            }
        }
    }

    /// Replay records from `file`, returning the offset just past the last
    /// complete record.
    fn replay_file(&self, file: &File, size: u64) -> CmdLogResult<u64> {
        let mut reader = file;
        reader.seek(SeekFrom::Start(0))?;

        let mut offset: u64 = 0;
        let mut header_buf = [0u8; RecordHeader::SIZE];
        let mut body = Vec::new();

        while offset < size {
            if size - offset < HEADER_SIZE as u64 {
                info!(
                    target: "cinder::recovery",
                    offset,
                    "header of the last record was not completely written"
                );
                break;
            }
            reader.read_exact(&mut header_buf)?;
            offset += HEADER_SIZE as u64;
            let header = RecordHeader::decode(header_buf);

            if size - offset < header.body_length as u64 {
                info!(
                    target: "cinder::recovery",
                    body_length = header.body_length,
                    "body of the last record was not completely written"
                );
                // Rewind over the torn header so the next append
                // overwrites the whole torn record.
                offset = reader.seek(SeekFrom::Current(-(RecordHeader::SIZE as i64)))?;
                break;
            }

            if header.body_length > 0 {
                if header.body_length > MAX_LOG_RECORD_SIZE - HEADER_SIZE {
                    return Err(CmdLogError::RecoveryCorrupt {
                        offset: offset - HEADER_SIZE as u64,
                        body_length: header.body_length,
                    });
                }
                body.clear();
                body.resize(header.body_length as usize, 0);
                reader.read_exact(&mut body)?;
                offset += header.body_length as u64;

                match self.codec.redo(&header, &body) {
                    Ok(()) => {}
                    Err(RedoError::OutOfMemory) => {
                        return Err(CmdLogError::OutOfMemory);
                    }
                    Err(e) => {
                        warn!(target: "cinder::recovery", %e, offset, "record replay failed, continuing");
                    }
                }
            }
        }
        Ok(offset)
    }

    /// Start the flush thread; returns once it is observably running.
    pub fn start_flush_thread(self: &Arc<Self>) -> CmdLogResult<()> {
        {
            let mut state = self.flusher.state.lock();
            state.run = RunState::Unstarted;
            state.reqstop = false;
        }

        let log = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("cinder-log-flusher".to_string())
            .spawn(move || log.flush_loop())
            .map_err(|e| {
                warn!(%e, "failed to create the command log flush thread");
                CmdLogError::ThreadStartFailed { source: e }
            })?;
        *self.flush_thread.lock() = Some(handle);

        let mut state = self.flusher.state.lock();
        while state.run != RunState::Started {
            self.flusher.cond.wait(&mut state);
        }
        info!("command log flush thread started");
        Ok(())
    }

    /// Stop the flush thread: request, signal, join. Safe to call when it
    /// never started.
    pub fn stop_flush_thread(&self) {
        {
            let mut state = self.flusher.state.lock();
            if state.run == RunState::Unstarted {
                return;
            }
            state.reqstop = true;
        }
        self.flusher.cond.notify_all();
        if let Some(handle) = self.flush_thread.lock().take() {
            let _ = handle.join();
            info!("command log flush thread stopped");
        }
    }

    /// Stop the flush thread and close the live file.
    ///
    /// Does not drain the ring; callers flush what they need durable
    /// first, and complete or abort any rotation in progress.
    pub fn shutdown(&self) {
        self.stop_flush_thread();
        let mut fs = self.files.lock();
        fs.files.finalize();
    }

    fn flush_loop(&self) {
        {
            let mut state = self.flusher.state.lock();
            state.run = RunState::Started;
            self.flusher.cond.notify_all();
        }

        loop {
            if self.flusher.state.lock().reqstop {
                info!("command log flush thread recognized stop request");
                break;
            }

            let nflush = {
                let mut fs = self.files.lock();
                self.flush_once(&mut fs, false)
            };

            if nflush == 0 {
                let mut state = self.flusher.state.lock();
                if !state.reqstop {
                    state.sleeping = true;
                    self.flusher.cond.wait_for(&mut state, self.flush_wait);
                    state.sleeping = false;
                }
            }
        }

        self.flusher.state.lock().run = RunState::Stopped;
    }

    /// Flush one request to disk. Caller holds the flush lock.
    ///
    /// With `flush_all` the open tail slot is closed and flushed too, so a
    /// caller looping on this drains everything written so far. Returns
    /// the number of bytes flushed; 0 means there was nothing to do.
    fn flush_once(&self, fs: &mut FlushState, flush_all: bool) -> u32 {
        let FlushState { files, scratch } = fs;

        let mut nflush: u32 = 0;
        let mut dual_write = false;
        let mut cleanup = false;
        let mut enter_next_file = false;

        {
            let mut ring = self.ring.lock();
            if ring.fque.in_cleanup() {
                if ring.fque.take_closed_window() {
                    // The pre-rotation backlog has drained: the retired
                    // file drops and the flush cursor follows the write
                    // cursor into the new file.
                    enter_next_file = true;
                    files.finish_cleanup();
                } else {
                    cleanup = true;
                }
            }
            if ring.fque.has_pending() {
                let slot = ring.fque.front();
                assert!(slot.nflush > 0);
                nflush = slot.nflush as u32;
                dual_write = slot.dual_write;
            } else if flush_all {
                let slot = ring.fque.tail_slot();
                if slot.nflush > 0 {
                    nflush = slot.nflush as u32;
                    dual_write = slot.dual_write;
                    ring.fque.close_tail();
                }
            }
            if nflush > 0 {
                ring.buf.reclaim_if_drained();
                scratch.clear();
                scratch.extend_from_slice(ring.buf.head_slice(nflush));
            }
        }

        if enter_next_file {
            let mut flush_lsn = self.flush_lsn.lock();
            flush_lsn.filenum += 1;
            flush_lsn.roffset = 0;
        }

        if nflush == 0 {
            return 0;
        }

        if cleanup {
            files.append_cleanup(scratch, dual_write);
        } else {
            files.append(scratch, dual_write);
        }

        self.flush_lsn.lock().roffset += nflush as u64;

        {
            let mut ring = self.ring.lock();
            ring.buf.advance_head(nflush);
            ring.buf.reclaim_if_drained();
            ring.fque.pop_front();
        }

        nflush
    }
}

impl Drop for CommandLog {
    fn drop(&mut self) {
        // Safety net; the engine calls shutdown() for a clean close.
        self.stop_flush_thread();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::PlainCodec;
    use tempfile::TempDir;

    fn test_log(dir: &TempDir) -> (Arc<CommandLog>, Arc<PlainCodec>) {
        let codec = Arc::new(PlainCodec::new());
        let log = Arc::new(
            CommandLog::new(CmdLogConfig::for_testing(), codec.clone()).unwrap(),
        );
        log.file_prepare(&dir.path().join("cmd.log")).unwrap();
        (log, codec)
    }

    fn record(len: usize) -> LogRecord {
        LogRecord::new(1, 0, vec![0x5A; len])
    }

    #[test]
    fn test_write_advances_write_lsn_by_total_length() {
        let dir = TempDir::new().unwrap();
        let (log, _) = test_log(&dir);

        let mut waiter = LogWaiter::new();
        log.record_write(&record(8), Some(&mut waiter), false);
        assert_eq!(waiter.lsn, LogSn::new(1, 0));

        log.record_write(&record(16), Some(&mut waiter), false);
        assert_eq!(waiter.lsn, LogSn::new(1, 16));

        log.record_write(&record(32), Some(&mut waiter), false);
        assert_eq!(waiter.lsn, LogSn::new(1, 40));
    }

    #[test]
    fn test_buffer_flush_advances_flush_lsn() {
        let dir = TempDir::new().unwrap();
        let (log, _) = test_log(&dir);

        let mut waiter = LogWaiter::new();
        log.record_write(&record(24), Some(&mut waiter), false);
        log.buffer_flush(waiter.lsn);

        assert_eq!(log.get_flush_lsn(), LogSn::new(1, 32));
        assert_eq!(log.file_getsize(), 32);
    }

    #[test]
    fn test_file_sync_advances_fsync_lsn_to_flush_snapshot() {
        let dir = TempDir::new().unwrap();
        let (log, _) = test_log(&dir);

        log.record_write(&record(8), None, false);
        log.buffer_flush(LogSn::new(1, 0));
        log.file_sync();

        assert_eq!(log.get_fsync_lsn(), log.get_flush_lsn());
    }

    #[test]
    fn test_lsn_cursors_stay_ordered() {
        let dir = TempDir::new().unwrap();
        let (log, _) = test_log(&dir);

        let mut waiter = LogWaiter::new();
        for _ in 0..10 {
            log.record_write(&record(100), Some(&mut waiter), false);
            assert!(log.get_fsync_lsn() <= log.get_flush_lsn());
            assert!(log.get_flush_lsn() <= LogSn::new(1, waiter.lsn.roffset + 108));
        }
        log.buffer_flush(waiter.lsn);
        log.file_sync();
        assert_eq!(log.get_fsync_lsn(), LogSn::new(1, 10 * 108));
    }

    #[test]
    fn test_flush_thread_drains_closed_requests() {
        let dir = TempDir::new().unwrap();
        let (log, _) = test_log(&dir);

        log.start_flush_thread().unwrap();
        // One record larger than a flush unit closes a request, which the
        // thread drains on its own. (Bytes left in the open tail slot wait
        // for an explicit buffer_flush.)
        log.record_write(&record(40_000 - 8), None, false);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while log.get_flush_lsn() < LogSn::new(1, 32 * 1024) {
            assert!(
                std::time::Instant::now() < deadline,
                "flusher made no progress"
            );
            thread::sleep(Duration::from_millis(1));
        }

        log.stop_flush_thread();
        // Idempotent.
        log.stop_flush_thread();
    }

    #[test]
    fn test_write_blocks_on_full_ring_and_self_flushes() {
        let dir = TempDir::new().unwrap();
        let (log, _) = test_log(&dir);

        // 1 MiB ring, no flush thread: the write path must flush for
        // itself once the ring fills.
        for _ in 0..40 {
            log.record_write(&record(30_000 - 8), None, false);
        }
        log.buffer_flush(LogSn::new(1, 1_200_000 - 1));

        assert_eq!(log.get_flush_lsn(), LogSn::new(1, 1_200_000));
        assert_eq!(log.file_getsize(), 1_200_000);
    }

    #[test]
    #[should_panic(expected = "cannot fit the ring")]
    fn test_oversized_record_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (log, _) = test_log(&dir);
        // Within the record size bound but larger than the test ring.
        log.record_write(&record(1_500_000), None, false);
    }

    #[test]
    fn test_prepare_rejects_overlong_path() {
        let dir = TempDir::new().unwrap();
        let (log, _) = test_log(&dir);
        let long = dir.path().join("x".repeat(300));
        assert!(matches!(
            log.file_prepare(&long),
            Err(CmdLogError::PathTooLong)
        ));
    }

    #[test]
    fn test_prepare_surfaces_open_failure() {
        let codec = Arc::new(PlainCodec::new());
        let log = CommandLog::new(CmdLogConfig::for_testing(), codec).unwrap();
        let missing_parent = Path::new("/nonexistent-cinder-dir/cmd.log");
        assert!(matches!(
            log.file_prepare(missing_parent),
            Err(CmdLogError::IoFailed { .. })
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let codec = Arc::new(PlainCodec::new());
        let config = CmdLogConfig::new().with_buffer_size(100);
        assert!(matches!(
            CommandLog::new(config, codec),
            Err(CmdLogError::InvalidConfig { .. })
        ));
    }
}
