//! Disk primitives for the log file.
//!
//! Thin wrappers over `std::fs` that restart interrupted calls and funnel
//! unrecoverable failures through one escalation point. Once a log write or
//! fsync fails, bytes the engine already considers logged may be missing
//! from disk; the write-ahead contract cannot be repaired in place, so the
//! process aborts and restarts into recovery.

use cinder_core::limits::LOG_FILE_MODE;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tracing::error;

/// Open a log file for read/write, creating it if missing.
pub(crate) fn open_log_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .mode(LOG_FILE_MODE)
        .open(path)
}

/// Write the whole buffer at the file's current position, restarting on
/// interruption. A zero-length write is reported as `WriteZero`.
pub(crate) fn write_fully(mut file: &File, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match file.write(buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "log file accepted no bytes",
                ));
            }
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Escalate an unrecoverable log-file failure: log it, then abort.
pub(crate) fn fatal(context: &str, err: &io::Error) -> ! {
    error!(%err, context, "unrecoverable log file failure, aborting");
    std::process::abort();
}

/// Fsync a log file, aborting on failure.
pub(crate) fn sync_or_abort(file: &File) {
    if let Err(e) = file.sync_all() {
        fatal("fsync", &e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_with_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cmd.log");

        let file = open_log_file(&path).unwrap();
        drop(file);

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, LOG_FILE_MODE);
    }

    #[test]
    fn test_open_existing_preserves_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cmd.log");
        std::fs::write(&path, b"existing").unwrap();

        let file = open_log_file(&path).unwrap();
        assert_eq!(file.metadata().unwrap().len(), 8);
    }

    #[test]
    fn test_write_fully_appends_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cmd.log");

        let file = open_log_file(&path).unwrap();
        write_fully(&file, b"alpha").unwrap();
        write_fully(&file, b"beta").unwrap();

        let mut content = String::new();
        let mut reopened = File::open(&path).unwrap();
        reopened.read_to_string(&mut content).unwrap();
        assert_eq!(content, "alphabeta");
    }
}
