//! Record Data Structure
//!
//! This module defines `Record` - the unit of data moving through a tributary
//! pipeline, from the instrumented producer to the network sender.
//!
//! ## What is a Record?
//! A record is one message produced by an instrumented run:
//! - A metric update (`loss = 0.31` at step 1200)
//! - A configuration change
//! - A captured console line
//! - A request addressed to the pipeline itself (status report, mark, read)
//! - A telemetry note about the pipeline
//!
//! ## Structure
//! Each record contains:
//! - **payload**: exactly one `RecordPayload` variant
//! - **control**: routing flags plus the log offset assigned on append
//! - **uuid**: optional correlation id used by the response router
//!
//! ## Control Flags
//! - `local`: producer-internal signal. Never appended to the durable log.
//! - `flow_control`: injected by the flow control engine itself (marks,
//!   overflow telemetry).
//! - `end_offset`: byte position just past this record in the durable log. Set
//!   once the record has been appended; `None` for local records.
//!
//! ## Design Decisions
//! - Payloads are a closed enum matched exhaustively. Request kinds this build
//!   does not understand decode into `Request::Other` and are carried untouched.
//! - Opaque values use `bytes::Bytes` so replaying a record never copies the
//!   payload.
//! - Every type is `Serialize`/`Deserialize` so the log can frame it with bincode.

use crate::offset::Offset;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A single record in the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// What the record carries
    pub payload: RecordPayload,

    /// Routing flags and log position
    pub control: Control,

    /// Correlation id for request/response matching
    pub uuid: Option<String>,
}

/// Routing flags carried by every record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    /// Producer-internal record, never written to the durable log
    pub local: bool,

    /// Record injected by the flow control engine
    pub flow_control: bool,

    /// Byte offset just past this record in the durable log
    pub end_offset: Option<Offset>,

    /// Mailbox slot of a caller waiting on a response to this record
    pub mailbox_slot: Option<String>,
}

/// Discriminated record payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordPayload {
    Metric(MetricUpdate),
    Config(ConfigUpdate),
    Output(OutputLine),
    Request(Request),
    Telemetry(TelemetryRecord),
}

/// A batch of metric values logged at one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricUpdate {
    pub step: u64,
    pub values: Vec<(String, f64)>,
}

/// Configuration keys set or removed by the producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub set: Vec<(String, Bytes)>,
    pub remove: Vec<String>,
}

/// A captured console line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Requests addressed to a pipeline component rather than to the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Sender reports the highest log offset it has durably processed.
    StatusReport { sent_offset: Offset },

    /// Asks the sender to answer with a status report.
    SenderMark,

    /// Asks the sender to replay `[start_offset, end_offset)` from the log.
    SenderRead {
        start_offset: Offset,
        end_offset: Offset,
    },

    /// A request kind this build does not understand.
    Other { kind: String },
}

impl Request {
    /// Stable name of the request kind, used in logs and metrics.
    pub fn kind(&self) -> &str {
        match self {
            Request::StatusReport { .. } => "status_report",
            Request::SenderMark => "sender_mark",
            Request::SenderRead { .. } => "sender_read",
            Request::Other { kind } => kind,
        }
    }
}

/// Telemetry about the pipeline itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub feature: TelemetryFeatures,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryFeatures {
    /// Flow control had to pause live forwarding at least once.
    pub flow_control_overflow: bool,
}

impl Record {
    pub fn new(payload: RecordPayload) -> Self {
        Self {
            payload,
            control: Control::default(),
            uuid: None,
        }
    }

    pub fn metric(step: u64, values: Vec<(String, f64)>) -> Self {
        Self::new(RecordPayload::Metric(MetricUpdate { step, values }))
    }

    pub fn config(set: Vec<(String, Bytes)>, remove: Vec<String>) -> Self {
        Self::new(RecordPayload::Config(ConfigUpdate { set, remove }))
    }

    pub fn output(stream: OutputStream, line: impl Into<Bytes>) -> Self {
        Self::new(RecordPayload::Output(OutputLine {
            stream,
            line: line.into(),
        }))
    }

    pub fn from_request(request: Request) -> Self {
        Self::new(RecordPayload::Request(request))
    }

    /// Status report emitted by the sender. Local: it describes sender
    /// progress and never belongs in the log.
    pub fn status_report(sent_offset: Offset) -> Self {
        Self::from_request(Request::StatusReport { sent_offset }).local()
    }

    /// Mark injected by the flow control engine to solicit a status report.
    pub fn sender_mark() -> Self {
        let mut record = Self::from_request(Request::SenderMark).local();
        record.control.flow_control = true;
        record
    }

    /// Replay request for the sender covering `[start, end)`.
    pub fn sender_read(start: Offset, end: Offset) -> Self {
        let mut record = Self::from_request(Request::SenderRead {
            start_offset: start,
            end_offset: end,
        })
        .local();
        record.control.flow_control = true;
        record
    }

    /// Telemetry record flagging that flow control engaged.
    pub fn overflow_telemetry() -> Self {
        let mut record = Self::new(RecordPayload::Telemetry(TelemetryRecord {
            feature: TelemetryFeatures {
                flow_control_overflow: true,
            },
        }));
        record.control.flow_control = true;
        record
    }

    /// Mark the record as producer-internal.
    pub fn local(mut self) -> Self {
        self.control.local = true;
        self
    }

    pub fn with_end_offset(mut self, offset: Offset) -> Self {
        self.control.end_offset = Some(offset);
        self
    }

    pub fn request_kind(&self) -> Option<&str> {
        self.request().map(Request::kind)
    }

    pub fn request(&self) -> Option<&Request> {
        match &self.payload {
            RecordPayload::Request(request) => Some(request),
            _ => None,
        }
    }

    pub fn is_local(&self) -> bool {
        self.control.local
    }

    pub fn is_flow_control(&self) -> bool {
        self.control.flow_control
    }

    pub fn end_offset(&self) -> Option<Offset> {
        self.control.end_offset
    }

    /// Estimate the in-memory size of this record in bytes
    pub fn estimated_size(&self) -> usize {
        let payload = match &self.payload {
            RecordPayload::Metric(m) => {
                8 + m.values.iter().map(|(k, _)| k.len() + 8).sum::<usize>()
            }
            RecordPayload::Config(c) => {
                c.set.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>()
                    + c.remove.iter().map(String::len).sum::<usize>()
            }
            RecordPayload::Output(o) => 1 + o.line.len(),
            RecordPayload::Request(Request::Other { kind }) => kind.len(),
            RecordPayload::Request(_) => 16,
            RecordPayload::Telemetry(_) => 1,
        };
        payload + 2 + 8 + self.uuid.as_ref().map(String::len).unwrap_or(0)
    }
}
