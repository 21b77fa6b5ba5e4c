//! Flow Control Engine
//!
//! Every record a producer ships passes through `FlowControl::flow`. The engine
//! writes it to the durable log, then either forwards it to the sender right
//! away or withholds it, depending on how far behind the sender is.
//!
//! ## Progress
//!
//! The sender confirms progress with status reports, which the engine solicits
//! by forwarding a mark every `mark_granularity` bytes. The gap between what was
//! forwarded and what was reported drives the state table in [`crate::fsm`]:
//!
//! - **Forwarding**: records are forwarded live. Once the gap reaches `high`
//!   the engine pauses and emits a one-time overflow telemetry record.
//! - **Pausing**: records stay in the log. When the gap drops below `mid` and
//!   enough has been buffered, the buffered range is replayed while the engine
//!   stays paused. When it drops below `low` the buffered range is replayed and
//!   live forwarding resumes.
//!
//! Replays go through the `RecordRecoverer`, which re-forwards logged records
//! in their original order. Nothing written is skipped: a byte is either
//! forwarded live, covered by a replay request, or still buffered in the log
//! until the next quiesce or `flush()`.
//!
//! ## Usage
//!
//! ```ignore
//! let mut engine = FlowControl::new(&config, writer, forwarder, recoverer)?;
//! for record in records {
//!     engine.flow(record).await?;
//! }
//! engine.flush().await?;
//! ```

use crate::config::{FlowControlConfig, Thresholds};
use crate::error::Result;
use crate::fsm::{self, Action, FlowState};
use crate::metrics::{
    FLOW_BYTES_BEHIND, FLOW_MARKS_TOTAL, FLOW_RECORDS_TOTAL, FLOW_RECOVERED_BYTES_TOTAL,
    FLOW_RECOVERIES_TOTAL, FLOW_TRANSITIONS_TOTAL,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use tributary_core::{
    Offset, ProgressCursors, Record, RecordForwarder, RecordRecoverer, RecordWriter, Request,
};

/// How far a replay request reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverExtent {
    /// Up to and including the most recent write
    ThroughLastWrite,
    /// Up to the write before the most recent one
    BeforeLastWrite,
}

/// Counters describing what an engine has done over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlowStats {
    pub records_seen: u64,
    pub records_written: u64,
    pub records_forwarded: u64,
    pub records_withheld: u64,
    pub status_reports: u64,
    pub marks_sent: u64,
    pub recoveries: u64,
    pub recovered_bytes: u64,
    pub pauses: u64,
    pub unpauses: u64,
    pub partial_recoveries: u64,
    pub overflow_reported: bool,
}

pub struct FlowControl<W, F, R> {
    thresholds: Thresholds,
    writer: W,
    forwarder: F,
    recoverer: R,
    state: FlowState,
    cursors: ProgressCursors,
    /// `forwarded` at the time the last mark was sent
    last_mark: Offset,
    stats: FlowStats,
}

impl<W, F, R> FlowControl<W, F, R>
where
    W: RecordWriter,
    F: RecordForwarder,
    R: RecordRecoverer,
{
    /// Build an engine, failing if the configured thresholds are inconsistent.
    pub fn new(config: &FlowControlConfig, writer: W, forwarder: F, recoverer: R) -> Result<Self> {
        let thresholds = config.thresholds()?;
        Ok(Self::with_thresholds(thresholds, writer, forwarder, recoverer))
    }

    pub fn with_thresholds(thresholds: Thresholds, writer: W, forwarder: F, recoverer: R) -> Self {
        debug!(
            high = thresholds.high,
            mid = thresholds.mid,
            low = thresholds.low,
            mark_granularity = thresholds.mark_granularity,
            "Flow control engine created"
        );
        Self {
            thresholds,
            writer,
            forwarder,
            recoverer,
            state: FlowState::Forwarding,
            cursors: ProgressCursors::default(),
            last_mark: 0,
            stats: FlowStats::default(),
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn cursors(&self) -> ProgressCursors {
        self.cursors
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn stats(&self) -> &FlowStats {
        &self.stats
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn forwarder(&self) -> &F {
        &self.forwarder
    }

    pub fn recoverer(&self) -> &R {
        &self.recoverer
    }

    pub fn into_parts(self) -> (W, F, R) {
        (self.writer, self.forwarder, self.recoverer)
    }

    /// Process one record.
    ///
    /// Collaborator errors are returned as-is; cursors are only moved after the
    /// call that justifies the move has succeeded.
    pub async fn flow(&mut self, mut record: Record) -> Result<()> {
        self.stats.records_seen += 1;

        let intercepted = self.process_request(&record);

        if record.is_local() {
            self.cursors.prev_written = self.cursors.written;
        } else {
            self.write_record(&mut record).await?;
        }

        match self.state {
            FlowState::Forwarding => self.check_forwarding(record, intercepted).await?,
            FlowState::Pausing => self.check_pausing(record, intercepted).await?,
        }

        self.evaluate_transitions().await
    }

    /// Make sure everything written is forwarded or covered by a replay.
    ///
    /// While forwarding there is nothing buffered. While pausing this runs the
    /// quiesce action but leaves the engine paused.
    pub async fn flush(&mut self) -> Result<()> {
        if self.state == FlowState::Pausing {
            debug!(
                forwarded = self.cursors.forwarded,
                written = self.cursors.written,
                "Flushing paused flow control"
            );
            self.apply(Action::Quiesce).await?;
        }
        Ok(())
    }

    /// Returns true when the record is a request handled here and not forwarded.
    fn process_request(&mut self, record: &Record) -> bool {
        match record.request() {
            Some(Request::StatusReport { sent_offset }) => {
                self.cursors.reported = self.cursors.reported.max(*sent_offset);
                self.stats.status_reports += 1;
                FLOW_BYTES_BEHIND.set(self.cursors.bytes_behind() as i64);
                debug!(sent_offset, reported = self.cursors.reported, "Status report");
                true
            }
            // Marks, reads and kinds this engine does not know pass through
            _ => false,
        }
    }

    async fn write_record(&mut self, record: &mut Record) -> Result<()> {
        let offset = self.writer.write_record(record).await?;
        self.cursors.prev_written = self.cursors.written;
        self.cursors.written = self.cursors.written.max(offset);
        record.control.end_offset = Some(offset);
        self.stats.records_written += 1;
        FLOW_RECORDS_TOTAL.with_label_values(&["written"]).inc();
        Ok(())
    }

    fn update_written_offset(&mut self, record: &Record) {
        if let Some(end) = record.end_offset() {
            self.cursors.written = self.cursors.written.max(end);
        }
    }

    fn advance_forwarded(&mut self, offset: Offset) {
        self.cursors.forwarded = self.cursors.forwarded.max(offset);
        self.cursors.recovering = self.cursors.recovering.max(self.cursors.forwarded);
        FLOW_BYTES_BEHIND.set(self.cursors.bytes_behind() as i64);
    }

    async fn check_forwarding(&mut self, record: Record, intercepted: bool) -> Result<()> {
        self.update_written_offset(&record);
        if intercepted {
            FLOW_RECORDS_TOTAL.with_label_values(&["intercepted"]).inc();
            return Ok(());
        }

        let end = record.end_offset();
        self.forward(record).await?;
        if let Some(end) = end {
            self.advance_forwarded(end);
        }
        self.maybe_send_mark().await
    }

    async fn check_pausing(&mut self, record: Record, intercepted: bool) -> Result<()> {
        self.update_written_offset(&record);
        if intercepted {
            FLOW_RECORDS_TOTAL.with_label_values(&["intercepted"]).inc();
            return Ok(());
        }

        if record.is_local() && !record.is_flow_control() {
            // Producer signals are never logged, so they cannot wait for a
            // replay. Catch the sender up first to keep them in order.
            let replayed_to = self.cursors.prev_written;
            self.send_recover_read(RecoverExtent::BeforeLastWrite)
                .await?;
            self.advance_forwarded(replayed_to);
            self.forward(record).await?;
            return Ok(());
        }

        self.stats.records_withheld += 1;
        FLOW_RECORDS_TOTAL.with_label_values(&["withheld"]).inc();
        Ok(())
    }

    async fn forward(&mut self, record: Record) -> Result<()> {
        self.forwarder.forward_record(record).await?;
        self.stats.records_forwarded += 1;
        FLOW_RECORDS_TOTAL.with_label_values(&["forwarded"]).inc();
        Ok(())
    }

    async fn maybe_send_mark(&mut self) -> Result<()> {
        if self.cursors.forwarded >= self.last_mark + self.thresholds.mark_granularity {
            self.send_mark().await?;
        }
        Ok(())
    }

    async fn send_mark(&mut self) -> Result<()> {
        self.forward(Record::sender_mark()).await?;
        self.last_mark = self.cursors.forwarded;
        self.stats.marks_sent += 1;
        FLOW_MARKS_TOTAL.inc();
        Ok(())
    }

    async fn send_recover_read(&mut self, extent: RecoverExtent) -> Result<()> {
        let start = self.cursors.recovering.max(self.cursors.forwarded);
        let end = match extent {
            RecoverExtent::ThroughLastWrite => self.cursors.written,
            RecoverExtent::BeforeLastWrite => self.cursors.prev_written,
        };

        if end > start {
            self.recoverer.recover_records(start, end).await?;
            self.stats.recoveries += 1;
            self.stats.recovered_bytes += end - start;
            FLOW_RECOVERIES_TOTAL.inc();
            FLOW_RECOVERED_BYTES_TOTAL.inc_by(end - start);
            debug!(start, end, ?extent, "Requested replay");
        }
        self.cursors.recovering = self.cursors.recovering.max(end);
        Ok(())
    }

    async fn evaluate_transitions(&mut self) -> Result<()> {
        let Some(transition) = fsm::select(self.state, &self.cursors, &self.thresholds) else {
            return Ok(());
        };

        if let Some(action) = transition.action {
            self.apply(action).await?;
        }
        self.enter(transition.target).await
    }

    async fn apply(&mut self, action: Action) -> Result<()> {
        match action {
            Action::Quiesce => {
                self.send_recover_read(RecoverExtent::ThroughLastWrite)
                    .await?;
                self.advance_forwarded(self.cursors.written);
                self.send_mark().await
            }
        }
    }

    async fn enter(&mut self, target: FlowState) -> Result<()> {
        let from = self.state;
        FLOW_TRANSITIONS_TOTAL
            .with_label_values(&[from.as_str(), target.as_str()])
            .inc();

        match (from, target) {
            (FlowState::Forwarding, FlowState::Pausing) => {
                self.state = target;
                self.stats.pauses += 1;
                info!(
                    forwarded = self.cursors.forwarded,
                    reported = self.cursors.reported,
                    behind = self.cursors.bytes_behind(),
                    "Sender fell behind, pausing live forwarding"
                );
                // Unpausing needs a status report, and the sender only
                // reports in answer to a mark.
                if self.cursors.forwarded > self.last_mark {
                    self.send_mark().await?;
                }
                self.report_overflow().await?;
            }
            (FlowState::Pausing, FlowState::Forwarding) => {
                self.state = target;
                self.stats.unpauses += 1;
                info!(
                    forwarded = self.cursors.forwarded,
                    reported = self.cursors.reported,
                    "Sender caught up, resuming live forwarding"
                );
            }
            _ => {
                self.stats.partial_recoveries += 1;
                debug!(
                    forwarded = self.cursors.forwarded,
                    reported = self.cursors.reported,
                    "Replayed buffered records while paused"
                );
            }
        }
        Ok(())
    }

    async fn report_overflow(&mut self) -> Result<()> {
        if self.stats.overflow_reported {
            return Ok(());
        }
        self.forward(Record::overflow_telemetry()).await?;
        self.stats.overflow_reported = true;
        warn!(
            high = self.thresholds.high,
            "Flow control engaged: sender throughput is below the producer's rate"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tributary_core::{Error, RecordPayload};

    /// Log stand-in: every record takes `size` bytes.
    struct FixedWriter {
        size: u64,
        written: Offset,
        fail: bool,
    }

    impl FixedWriter {
        fn new(size: u64) -> Self {
            Self {
                size,
                written: 0,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl RecordWriter for FixedWriter {
        async fn write_record(&mut self, _record: &Record) -> tributary_core::Result<Offset> {
            if self.fail {
                return Err(Error::Collaborator("disk full".to_string()));
            }
            self.written += self.size;
            Ok(self.written)
        }
    }

    #[derive(Default)]
    struct Sink(Vec<Record>);

    #[async_trait]
    impl RecordForwarder for Sink {
        async fn forward_record(&mut self, record: Record) -> tributary_core::Result<()> {
            self.0.push(record);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Reads(Vec<(Offset, Offset)>);

    #[async_trait]
    impl RecordRecoverer for Reads {
        async fn recover_records(
            &mut self,
            start: Offset,
            end: Offset,
        ) -> tributary_core::Result<()> {
            self.0.push((start, end));
            Ok(())
        }
    }

    fn engine(size: u64) -> FlowControl<FixedWriter, Sink, Reads> {
        let thresholds = Thresholds::new(100, 50, 10, 1000, 20).unwrap();
        FlowControl::with_thresholds(
            thresholds,
            FixedWriter::new(size),
            Sink::default(),
            Reads::default(),
        )
    }

    fn metric(step: u64) -> Record {
        Record::metric(step, vec![("loss".to_string(), 0.5)])
    }

    #[test]
    fn test_new_rejects_bad_thresholds() {
        let config = FlowControlConfig {
            threshold_high_bytes: 10,
            threshold_mid_bytes: 20,
            threshold_low_bytes: 5,
            ..Default::default()
        };
        let result = FlowControl::new(
            &config,
            FixedWriter::new(1),
            Sink::default(),
            Reads::default(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_forwarding_stamps_and_forwards() {
        let mut engine = engine(10);
        engine.flow(metric(0)).await.unwrap();
        engine.flow(metric(1)).await.unwrap();

        let cursors = engine.cursors();
        assert_eq!(cursors.written, 20);
        assert_eq!(cursors.prev_written, 10);
        assert_eq!(cursors.forwarded, 20);
        assert_eq!(cursors.recovering, 20);

        let forwarded = &engine.forwarder().0;
        assert_eq!(forwarded.len(), 2);
        assert_eq!(forwarded[0].end_offset(), Some(10));
        assert_eq!(forwarded[1].end_offset(), Some(20));
    }

    #[tokio::test]
    async fn test_status_report_is_intercepted() {
        let mut engine = engine(10);
        engine.flow(metric(0)).await.unwrap();
        engine.flow(Record::status_report(42)).await.unwrap();

        assert_eq!(engine.cursors().reported, 42);
        assert_eq!(engine.forwarder().0.len(), 1);
        assert_eq!(engine.stats().status_reports, 1);
        // Local: not written
        assert_eq!(engine.stats().records_written, 1);
    }

    #[tokio::test]
    async fn test_reported_never_decreases() {
        let mut engine = engine(10);
        engine.flow(Record::status_report(30)).await.unwrap();
        engine.flow(Record::status_report(12)).await.unwrap();
        assert_eq!(engine.cursors().reported, 30);
    }

    #[tokio::test]
    async fn test_unknown_request_passes_through() {
        let mut engine = engine(10);
        let record = Record::from_request(Request::Other {
            kind: "shutdown".to_string(),
        });
        engine.flow(record).await.unwrap();

        assert_eq!(engine.forwarder().0.len(), 1);
        assert_eq!(engine.forwarder().0[0].request_kind(), Some("shutdown"));
    }

    #[tokio::test]
    async fn test_pause_emits_overflow_telemetry() {
        let mut engine = engine(50);
        engine.flow(metric(0)).await.unwrap();
        assert_eq!(engine.state(), FlowState::Forwarding);

        engine.flow(metric(1)).await.unwrap();
        assert_eq!(engine.state(), FlowState::Pausing);

        let last = engine.forwarder().0.last().unwrap();
        match &last.payload {
            RecordPayload::Telemetry(t) => assert!(t.feature.flow_control_overflow),
            other => panic!("expected telemetry, got {:?}", other),
        }
        assert!(engine.stats().overflow_reported);
        assert_eq!(engine.stats().pauses, 1);
    }

    #[tokio::test]
    async fn test_pause_solicits_report_below_mark_granularity() {
        // Granularity 1000 is never reached before pausing at 100
        let mut engine = engine(50);
        engine.flow(metric(0)).await.unwrap();
        engine.flow(metric(1)).await.unwrap();
        assert_eq!(engine.state(), FlowState::Pausing);

        let kinds: Vec<_> = engine
            .forwarder()
            .0
            .iter()
            .map(|r| r.request_kind().unwrap_or("data"))
            .collect();
        assert_eq!(kinds, vec!["data", "data", "sender_mark", "data"]);
        assert_eq!(engine.stats().marks_sent, 1);

        // Answering that mark is enough to resume
        engine.flow(Record::status_report(100)).await.unwrap();
        assert_eq!(engine.state(), FlowState::Forwarding);
    }

    #[tokio::test]
    async fn test_pause_right_after_mark_sends_no_duplicate() {
        let thresholds = Thresholds::new(100, 50, 10, 100, 20).unwrap();
        let mut engine = FlowControl::with_thresholds(
            thresholds,
            FixedWriter::new(50),
            Sink::default(),
            Reads::default(),
        );
        engine.flow(metric(0)).await.unwrap();
        engine.flow(metric(1)).await.unwrap();
        assert_eq!(engine.state(), FlowState::Pausing);
        assert_eq!(engine.stats().marks_sent, 1);
    }

    #[tokio::test]
    async fn test_paused_records_are_withheld() {
        let mut engine = engine(50);
        engine.flow(metric(0)).await.unwrap();
        engine.flow(metric(1)).await.unwrap();
        let forwarded_before = engine.forwarder().0.len();

        engine.flow(metric(2)).await.unwrap();
        assert_eq!(engine.forwarder().0.len(), forwarded_before);
        assert_eq!(engine.cursors().written, 150);
        assert_eq!(engine.cursors().forwarded, 100);
        assert_eq!(engine.stats().records_withheld, 1);
    }

    #[tokio::test]
    async fn test_mark_sent_every_granularity() {
        let thresholds = Thresholds::new(10_000, 5_000, 1_000, 64, 0).unwrap();
        let mut engine = FlowControl::with_thresholds(
            thresholds,
            FixedWriter::new(40),
            Sink::default(),
            Reads::default(),
        );

        // 40: no mark, 80: mark, 120: no mark, 160: mark
        for step in 0..4 {
            engine.flow(metric(step)).await.unwrap();
        }
        let kinds: Vec<_> = engine
            .forwarder()
            .0
            .iter()
            .map(|r| r.request_kind().unwrap_or("data"))
            .collect();
        assert_eq!(
            kinds,
            vec!["data", "data", "sender_mark", "data", "data", "sender_mark"]
        );
        assert_eq!(engine.stats().marks_sent, 2);
    }

    #[tokio::test]
    async fn test_flush_while_forwarding_is_noop() {
        let mut engine = engine(10);
        engine.flow(metric(0)).await.unwrap();
        engine.flush().await.unwrap();
        assert!(engine.recoverer().0.is_empty());
    }

    #[tokio::test]
    async fn test_flush_while_paused_replays_buffer() {
        let mut engine = engine(50);
        for step in 0..4 {
            engine.flow(metric(step)).await.unwrap();
        }
        assert_eq!(engine.state(), FlowState::Pausing);

        engine.flush().await.unwrap();
        assert_eq!(engine.recoverer().0, vec![(100, 200)]);
        assert_eq!(engine.cursors().forwarded, 200);
        assert_eq!(engine.state(), FlowState::Pausing);

        // Nothing new: a second flush has nothing to replay
        engine.flush().await.unwrap();
        assert_eq!(engine.recoverer().0.len(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_leaves_cursors_untouched() {
        let mut engine = engine(10);
        engine.flow(metric(0)).await.unwrap();
        let before = engine.cursors();

        engine.writer.fail = true;
        let result = engine.flow(metric(1)).await;
        assert!(matches!(result, Err(crate::FlowError::Collaborator(_))));
        assert_eq!(engine.cursors(), before);
        assert_eq!(engine.forwarder().0.len(), 1);
    }
}
