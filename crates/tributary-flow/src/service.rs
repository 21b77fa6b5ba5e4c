//! Flow control driver task and channel-backed collaborators.
//!
//! A `FlowTask` owns one engine for its whole life and feeds it records one
//! at a time from a bounded channel. When every producer handle is dropped it
//! flushes the engine and returns the final `FlowStats`.
//!
//! ```ignore
//! let (sender_tx, sender_rx) = mpsc::unbounded_channel();
//! let forwarder = ChannelForwarder::new(sender_tx.clone());
//! let recoverer = SenderReadRecoverer::new(ChannelForwarder::new(sender_tx));
//! let engine = FlowControl::new(&config, writer, forwarder, recoverer)?;
//!
//! let handle = FlowTask::spawn(engine, 1024);
//! handle.send(record).await?;
//! let stats = handle.finish().await?;
//! ```

use crate::error::{FlowError, Result};
use crate::flow_control::{FlowControl, FlowStats};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tributary_core::{
    Error, Offset, Record, RecordForwarder, RecordRecoverer, RecordWriter,
};

/// Hands forwarded records to a sender task over an unbounded channel.
///
/// The channel is only as deep as flow control lets it grow.
#[derive(Clone)]
pub struct ChannelForwarder {
    tx: mpsc::UnboundedSender<Record>,
}

impl ChannelForwarder {
    pub fn new(tx: mpsc::UnboundedSender<Record>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl RecordForwarder for ChannelForwarder {
    async fn forward_record(&mut self, record: Record) -> tributary_core::Result<()> {
        self.tx
            .send(record)
            .map_err(|_| Error::ChannelClosed("sender"))
    }
}

/// Recovers a range by asking the sender to read it from the log itself.
///
/// The read request travels through the same forwarder as live records, so
/// the sender sees it in order.
pub struct SenderReadRecoverer<F> {
    forwarder: F,
}

impl<F: RecordForwarder> SenderReadRecoverer<F> {
    pub fn new(forwarder: F) -> Self {
        Self { forwarder }
    }
}

#[async_trait]
impl<F: RecordForwarder> RecordRecoverer for SenderReadRecoverer<F> {
    async fn recover_records(&mut self, start: Offset, end: Offset) -> tributary_core::Result<()> {
        self.forwarder
            .forward_record(Record::sender_read(start, end))
            .await
    }
}

/// Drives one flow control engine from a channel of records.
pub struct FlowTask<W, F, R> {
    engine: FlowControl<W, F, R>,
    records: mpsc::Receiver<Record>,
}

impl<W, F, R> FlowTask<W, F, R>
where
    W: RecordWriter + 'static,
    F: RecordForwarder + 'static,
    R: RecordRecoverer + 'static,
{
    pub fn new(engine: FlowControl<W, F, R>, records: mpsc::Receiver<Record>) -> Self {
        Self { engine, records }
    }

    /// Spawn the task with an input channel of `capacity` records.
    pub fn spawn(engine: FlowControl<W, F, R>, capacity: usize) -> FlowTaskHandle {
        let (tx, rx) = mpsc::channel(capacity);
        let join = tokio::spawn(Self::new(engine, rx).run());
        FlowTaskHandle { tx, join }
    }

    /// Process records until the channel closes, then flush.
    ///
    /// The first collaborator error stops the task.
    pub async fn run(mut self) -> Result<FlowStats> {
        info!("Flow task started");

        while let Some(record) = self.records.recv().await {
            if let Err(e) = self.engine.flow(record).await {
                error!(error = %e, state = self.engine.state().as_str(), "Flow control failed");
                return Err(e);
            }
        }

        self.engine.flush().await?;

        let stats = self.engine.stats().clone();
        info!(
            records = stats.records_seen,
            forwarded = stats.records_forwarded,
            recoveries = stats.recoveries,
            pauses = stats.pauses,
            "Flow task finished"
        );
        Ok(stats)
    }
}

/// Producer side of a spawned `FlowTask`.
pub struct FlowTaskHandle {
    tx: mpsc::Sender<Record>,
    join: JoinHandle<Result<FlowStats>>,
}

impl FlowTaskHandle {
    /// Queue a record, waiting while the task's channel is full.
    pub async fn send(&self, record: Record) -> Result<()> {
        self.tx
            .send(record)
            .await
            .map_err(|_| FlowError::ChannelClosed("flow task"))
    }

    /// Another producer handle onto the same task.
    pub fn sender(&self) -> mpsc::Sender<Record> {
        self.tx.clone()
    }

    /// Close this handle's sender and wait for the task to finish.
    ///
    /// The task only finishes once every sender obtained from `sender()` is
    /// dropped as well.
    pub async fn finish(self) -> Result<FlowStats> {
        let Self { tx, join } = self;
        drop(tx);
        join.await
            .map_err(|e| FlowError::TaskFailed(e.to_string()))?
    }
}
