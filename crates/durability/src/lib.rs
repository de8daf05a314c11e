//! Command-log buffer for the cinder cache server
//!
//! This crate implements the durable staging area between the engine's
//! foreground threads and the on-disk command log:
//! - `CommandLog`: write path, flush path, on-demand fsync, recovery
//! - a 100 MiB in-memory byte ring batching serialized records
//! - a flush-request queue grouping ring bytes into bounded disk writes
//! - a single flush thread draining the queue in log order
//! - dual-write file rotation driven by the checkpoint subsystem
//!
//! Records enter through [`CommandLog::record_write`] and become readable
//! by recovery once flushed and fsynced. Three cursors track the pipeline
//! (`write`, `flush`, `fsync`); [`CommandLog::buffer_flush`] and
//! [`CommandLog::file_sync`] move the latter two on demand.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod buffer;
mod cmdlog;
mod config;
mod disk;
mod file;
mod flusher;
mod fqueue;
pub mod testing;

pub use cmdlog::CommandLog;
pub use config::{CmdLogConfig, CmdLogConfigError};
