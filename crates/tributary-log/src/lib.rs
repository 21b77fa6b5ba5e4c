//! Tributary Record Log
//!
//! File-backed durable log for the tributary pipeline. Every non-local record
//! is appended here before the flow control engine decides whether to forward
//! it live; when the sender falls behind, the engine asks for byte ranges of
//! this log to be replayed instead.
//!
//! ## Components
//!
//! - `RecordLog`: append-only file with checksummed frames and byte offsets
//! - `LogWriter`: `RecordWriter` adapter used by the engine
//! - `LogReplayer`: `RecordRecoverer` adapter that re-forwards a byte range
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use tributary_log::{LogConfig, LogReplayer, LogWriter, RecordLog};
//!
//! let log = Arc::new(RecordLog::open(&LogConfig::default()).await?);
//! let writer = LogWriter::new(log.clone());
//! let replayer = LogReplayer::new(log, sender_forwarder.clone());
//! ```

pub mod config;
pub mod log;
pub mod replay;

pub use config::{LogConfig, SyncPolicy};
pub use log::{RecordLog, HEADER_LEN, LOG_MAGIC, LOG_VERSION};
pub use replay::{LogReplayer, LogWriter};
