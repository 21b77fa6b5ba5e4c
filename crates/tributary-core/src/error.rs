//! Error Types for tributary collaborators
//!
//! This module defines the errors a collaborator (durable log, sender, replayer)
//! can return to the flow control engine. The engine never handles them; they
//! propagate to whoever drives `flow()`.
//!
//! ## Error Categories
//!
//! ### I/O Errors
//! - `Io`: file system operations on the durable log
//!
//! ### Data Integrity Errors
//! - `Corrupted`: a log frame failed its CRC check
//! - `Codec`: a record could not be encoded or decoded
//! - `InvalidRange`: a replay range is reversed or beyond the written offset
//!
//! ### Plumbing Errors
//! - `ChannelClosed`: the receiving side of a channel collaborator is gone
//! - `Collaborator`: any other failure reported by a collaborator

use crate::offset::Offset;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record codec error: {0}")]
    Codec(String),

    #[error("Corrupted log frame at offset {offset}")]
    Corrupted { offset: Offset },

    #[error("Invalid log range: {start}..{end}")]
    InvalidRange { start: Offset, end: Offset },

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Collaborator error: {0}")]
    Collaborator(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Corrupted { offset: 4096 };
        assert_eq!(err.to_string(), "Corrupted log frame at offset 4096");

        let err = Error::InvalidRange { start: 10, end: 5 };
        assert_eq!(err.to_string(), "Invalid log range: 10..5");

        let err = Error::ChannelClosed("sender");
        assert_eq!(err.to_string(), "Channel closed: sender");
    }

    #[test]
    fn test_io_error_converts() {
        fn open() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))?;
            Ok(())
        }
        assert!(matches!(open(), Err(Error::Io(_))));
    }
}
