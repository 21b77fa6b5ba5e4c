//! Tributary Core
//!
//! Shared data model for the tributary event-shipping pipeline: records,
//! log offsets, progress cursors, and the collaborator contracts the flow
//! control engine drives.

pub mod collaborator;
pub mod error;
pub mod offset;
pub mod record;

pub use collaborator::{RecordForwarder, RecordRecoverer, RecordWriter};
pub use error::{Error, Result};
pub use offset::{Offset, ProgressCursors};
pub use record::{
    ConfigUpdate, Control, MetricUpdate, OutputLine, OutputStream, Record, RecordPayload,
    Request, TelemetryFeatures, TelemetryRecord,
};
