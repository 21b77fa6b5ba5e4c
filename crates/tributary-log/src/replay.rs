//! Collaborator adapters over `RecordLog`.
//!
//! - `LogWriter` is the `RecordWriter` the flow control engine appends through.
//! - `LogReplayer` is the `RecordRecoverer`: it reads the requested byte range
//!   back from the log and re-forwards each record, in log order, through the
//!   same forwarder the engine uses for live records.

use crate::log::RecordLog;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use tributary_core::{Offset, Record, RecordForwarder, RecordRecoverer, RecordWriter, Result};

/// Appends engine records to a shared `RecordLog`.
#[derive(Clone)]
pub struct LogWriter {
    log: Arc<RecordLog>,
}

impl LogWriter {
    pub fn new(log: Arc<RecordLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl RecordWriter for LogWriter {
    async fn write_record(&mut self, record: &Record) -> Result<Offset> {
        self.log.append(record).await
    }
}

/// Replays log ranges into a forwarder.
pub struct LogReplayer<F> {
    log: Arc<RecordLog>,
    forwarder: F,
    replayed_records: u64,
}

impl<F: RecordForwarder> LogReplayer<F> {
    pub fn new(log: Arc<RecordLog>, forwarder: F) -> Self {
        Self {
            log,
            forwarder,
            replayed_records: 0,
        }
    }

    /// Total records re-forwarded so far.
    pub fn replayed_records(&self) -> u64 {
        self.replayed_records
    }

    pub fn into_forwarder(self) -> F {
        self.forwarder
    }
}

#[async_trait]
impl<F: RecordForwarder> RecordRecoverer for LogReplayer<F> {
    async fn recover_records(&mut self, start: Offset, end: Offset) -> Result<()> {
        let records = self.log.read_range(start, end).await?;
        let count = records.len();
        for record in records {
            self.forwarder.forward_record(record).await?;
        }
        self.replayed_records += count as u64;

        debug!(start, end, records = count, "Replayed log range");
        Ok(())
    }
}
