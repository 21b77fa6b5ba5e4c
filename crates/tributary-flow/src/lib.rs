//! Tributary Flow
//!
//! The control core between a record producer and the network sender:
//!
//! - [`flow_control`]: the engine that decides, per record, whether it is
//!   forwarded live or left in the durable log for a later replay, bounding the
//!   data the sender has not confirmed yet.
//! - [`fsm`]: the engine's state table.
//! - [`router`]: correlates asynchronous responses with the callers waiting
//!   for them.
//! - [`service`]: a tokio task driving one engine, plus channel-backed
//!   collaborators.
//!
//! Collaborator contracts (`RecordWriter`, `RecordForwarder`,
//! `RecordRecoverer`) live in `tributary-core`; a file-backed log implementing
//! them lives in `tributary-log`.

pub mod config;
pub mod error;
pub mod flow_control;
pub mod fsm;
pub mod metrics;
pub mod router;
pub mod service;

pub use config::{FlowControlConfig, RouterConfig, Thresholds};
pub use error::{FlowError, Result};
pub use flow_control::{FlowControl, FlowStats, RecoverExtent};
pub use fsm::{Action, FlowState, Guard, Transition};
pub use router::{MessageFuture, MessageRouter, RouterHandle, RouterStats, RouterTask};
pub use service::{ChannelForwarder, FlowTask, FlowTaskHandle, SenderReadRecoverer};
