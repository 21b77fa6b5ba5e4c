//! Log offsets and progress cursors.
//!
//! An `Offset` is a byte position in the durable log's append-only stream.
//! The flow control engine tracks how far four independent actors have
//! progressed through that stream:
//!
//! ```text
//!  0                                                       written
//!  |---------|-----------------|----------------|-------------|
//!         reported         forwarded        recovering   prev_written
//! ```
//!
//! | Cursor | Advanced when |
//! |---|---|
//! | `written` | the log acknowledges an append |
//! | `prev_written` | the next record is processed (previous `written`) |
//! | `forwarded` | a record is handed to the sender, live or by replay |
//! | `recovering` | a replay of a byte range is requested |
//! | `reported` | the sender reports its processed offset |

use serde::{Deserialize, Serialize};

/// Byte position in the durable log.
pub type Offset = u64;

/// Snapshot of the engine's progress cursors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCursors {
    pub written: Offset,
    pub prev_written: Offset,
    pub forwarded: Offset,
    pub recovering: Offset,
    pub reported: Offset,
}

impl ProgressCursors {
    /// Bytes handed to the sender that it has not confirmed yet.
    pub fn bytes_behind(&self) -> u64 {
        self.forwarded.saturating_sub(self.reported)
    }

    /// Bytes written to the log that are neither forwarded nor requested for replay.
    pub fn unforwarded(&self) -> u64 {
        self.written
            .saturating_sub(self.recovering.max(self.forwarded))
    }

    /// Whether a replay request is still ahead of the forwarded cursor.
    pub fn replay_outstanding(&self) -> bool {
        self.recovering > self.forwarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_behind() {
        let cursors = ProgressCursors {
            written: 200,
            forwarded: 150,
            reported: 100,
            ..Default::default()
        };
        assert_eq!(cursors.bytes_behind(), 50);
    }

    #[test]
    fn test_bytes_behind_saturates_on_early_report() {
        let cursors = ProgressCursors {
            forwarded: 10,
            reported: 40,
            ..Default::default()
        };
        assert_eq!(cursors.bytes_behind(), 0);
    }

    #[test]
    fn test_unforwarded_respects_replay_cursor() {
        let mut cursors = ProgressCursors {
            written: 300,
            forwarded: 100,
            ..Default::default()
        };
        assert_eq!(cursors.unforwarded(), 200);
        assert!(!cursors.replay_outstanding());

        cursors.recovering = 250;
        assert_eq!(cursors.unforwarded(), 50);
        assert!(cursors.replay_outstanding());
    }
}
