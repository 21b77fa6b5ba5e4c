//! Collaborator contracts.
//!
//! The flow control engine never touches storage or the network directly. It
//! drives three narrow callbacks, each implemented by a collaborator:
//!
//! ```text
//!                 write_record            ┌──────────────┐
//!            ┌──────────────────────────> │ Durable Log  │
//!            │    recover_records         │              │
//! ┌────────┐ ├──────────────────────────> └──────┬───────┘
//! │ Engine │ │                                   │ replayed records
//! └────────┘ │    forward_record          ┌──────▼───────┐
//!            └──────────────────────────> │    Sender    │
//!                                         └──────────────┘
//! ```
//!
//! Each call is awaited before the engine processes the next record, so
//! implementations observe calls in submission order.

use crate::error::Result;
use crate::offset::Offset;
use crate::record::Record;
use async_trait::async_trait;

/// Appends records to the durable log.
#[async_trait]
pub trait RecordWriter: Send {
    /// Append a record and return the new highest written offset.
    ///
    /// Called at most once per non-local record, in submission order.
    async fn write_record(&mut self, record: &Record) -> Result<Offset>;
}

/// Hands records to the sender for eventual transmission.
#[async_trait]
pub trait RecordForwarder: Send {
    async fn forward_record(&mut self, record: Record) -> Result<()>;
}

/// Replays a byte range of the durable log to the sender.
#[async_trait]
pub trait RecordRecoverer: Send {
    /// Request replay of `[start, end)`. Replayed records must reach the
    /// sender in their original order.
    async fn recover_records(&mut self, start: Offset, end: Offset) -> Result<()>;
}

#[async_trait]
impl<T: RecordForwarder + ?Sized> RecordForwarder for Box<T> {
    async fn forward_record(&mut self, record: Record) -> Result<()> {
        (**self).forward_record(record).await
    }
}

#[async_trait]
impl<T: RecordWriter + ?Sized> RecordWriter for Box<T> {
    async fn write_record(&mut self, record: &Record) -> Result<Offset> {
        (**self).write_record(record).await
    }
}

#[async_trait]
impl<T: RecordRecoverer + ?Sized> RecordRecoverer for Box<T> {
    async fn recover_records(&mut self, start: Offset, end: Offset) -> Result<()> {
        (**self).recover_records(start, end).await
    }
}
