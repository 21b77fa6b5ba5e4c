//! Durable Record Log
//!
//! Append-only file that persists every non-local record before the flow
//! control engine decides whether to forward it. Offsets handed back to the
//! engine are byte positions in this file, so a replay request is simply a
//! byte range.
//!
//! ## File Format
//!
//! ```text
//! [Header][Frame 1][Frame 2]...[Frame N]
//!
//! Header (8 bytes):
//! ┌──────────────┬──────────────┐
//! │ Magic TRBLOG │ Version u16  │
//! └──────────────┴──────────────┘
//!
//! Frame:
//! ┌─────────────┬──────────┬───────────────────┐
//! │ Payload Len │ CRC32    │ bincode(Record)   │
//! │ (4 bytes)   │(4 bytes) │ (Payload Len)     │
//! └─────────────┴──────────┴───────────────────┘
//! ```
//!
//! The offset returned by `append()` is the byte position just past the
//! frame, which becomes the record's `end_offset`. A failed append truncates
//! whatever part of its frame reached the file, so the next frame starts at
//! the offset the engine already holds.
//!
//! ## Recovery
//!
//! `open()` walks the frames of an existing file. The first frame that is cut
//! short or fails its checksum marks the end of valid data; anything after it
//! is truncated away so new appends continue from a clean boundary.
//!
//! ## Usage
//!
//! ```ignore
//! let log = RecordLog::open(&LogConfig::default()).await?;
//! let end = log.append(&record).await?;
//! let replay = log.read_range(start, end).await?;
//! ```

use crate::config::{LogConfig, SyncPolicy};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader, SeekFrom};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use tributary_core::{Error, Offset, Record, Result};

/// Magic bytes at the start of every log file
pub const LOG_MAGIC: &[u8; 6] = b"TRBLOG";

/// Current file format version
pub const LOG_VERSION: u16 = 1;

/// Size of the file header; the first frame starts here
pub const HEADER_LEN: u64 = 8;

const FRAME_HEADER_LEN: u64 = 8;

/// Frames larger than this are treated as garbage during recovery
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Outcome of reading one frame.
enum Frame {
    Record { record: Record, len: u64 },
    /// End of file reached before the frame was complete
    Truncated,
    /// Length or checksum does not hold
    Invalid,
}

struct Appender {
    file: File,
    last_sync: Instant,
    /// Write only this many bytes of the next frame, then fail
    #[cfg(test)]
    fail_after: Option<usize>,
}

/// Append-only record log addressed by byte offsets.
pub struct RecordLog {
    path: PathBuf,
    sync_policy: SyncPolicy,
    appender: Mutex<Appender>,
    written: AtomicU64,
    /// Set when a failed append could not be rolled back
    poisoned: AtomicBool,
}

impl RecordLog {
    /// Open or create the log described by `config`.
    ///
    /// An existing file is scanned and any torn tail is truncated.
    pub async fn open(config: &LogConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.directory).await?;
        let path = config.path();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .await?;

        let file_len = file.metadata().await?.len();

        let written = if file_len < HEADER_LEN {
            // New file (or one that died before its header was complete)
            file.set_len(0).await?;
            file.seek(SeekFrom::Start(0)).await?;
            file.write_all(&encode_header()).await?;
            file.flush().await?;
            file.sync_data().await?;
            HEADER_LEN
        } else {
            let valid_end = scan(&path, file_len).await?;
            if valid_end < file_len {
                warn!(
                    path = ?path,
                    valid_end,
                    file_len,
                    "Torn tail in record log, truncating"
                );
                file.set_len(valid_end).await?;
                file.sync_data().await?;
            }
            valid_end
        };

        file.seek(SeekFrom::Start(written)).await?;

        info!(
            path = ?path,
            written,
            sync_policy = ?config.sync_policy,
            "Record log opened"
        );

        Ok(Self {
            path,
            sync_policy: config.sync_policy,
            appender: Mutex::new(Appender {
                file,
                last_sync: Instant::now(),
                #[cfg(test)]
                fail_after: None,
            }),
            written: AtomicU64::new(written),
            poisoned: AtomicBool::new(false),
        })
    }

    /// Append a record, returning the offset just past its frame.
    ///
    /// On failure the file is cut back to the last good frame.
    pub async fn append(&self, record: &Record) -> Result<Offset> {
        let frame = encode_frame(record)?;

        let mut appender = self.appender.lock().await;
        if self.poisoned.load(Ordering::Acquire) {
            return Err(Error::Collaborator(format!(
                "record log {:?} is unusable after a failed rollback",
                self.path
            )));
        }

        let start = self.written_offset();
        if let Err(e) = self.write_frame(&mut appender, &frame).await {
            warn!(path = ?self.path, offset = start, error = %e, "Append failed, rolling back");
            if let Err(rollback) = rewind(&mut appender.file, start).await {
                error!(
                    path = ?self.path,
                    offset = start,
                    error = %rollback,
                    "Could not roll back failed append"
                );
                self.poisoned.store(true, Ordering::Release);
            }
            return Err(e);
        }

        let len = frame.len() as u64;
        let end = self.written.fetch_add(len, Ordering::AcqRel) + len;
        Ok(end)
    }

    async fn write_frame(&self, appender: &mut Appender, frame: &[u8]) -> Result<()> {
        #[cfg(test)]
        if let Some(partial) = appender.fail_after.take() {
            appender.file.write_all(&frame[..partial.min(frame.len())]).await?;
            appender.file.flush().await?;
            return Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "device full").into());
        }

        appender.file.write_all(frame).await?;
        appender.file.flush().await?;
        self.maybe_sync(appender).await
    }

    /// Read every record whose frame lies within `[start, end)`.
    ///
    /// Returned records carry their `end_offset`. Offsets below the header are
    /// clamped to the first frame.
    pub async fn read_range(&self, start: Offset, end: Offset) -> Result<Vec<Record>> {
        let written = self.written_offset();
        if start > end || end > written {
            return Err(Error::InvalidRange { start, end });
        }

        let start = start.max(HEADER_LEN);
        if start >= end {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut reader = BufReader::new(file);

        let mut records = Vec::new();
        let mut pos = start;
        while pos < end {
            match read_frame(&mut reader).await? {
                Frame::Record { mut record, len } => {
                    if pos + len > end {
                        break;
                    }
                    pos += len;
                    record.control.end_offset = Some(pos);
                    records.push(record);
                }
                Frame::Truncated | Frame::Invalid => {
                    return Err(Error::Corrupted { offset: pos });
                }
            }
        }

        debug!(
            start,
            end,
            records = records.len(),
            "Read record log range"
        );

        Ok(records)
    }

    /// Highest offset durably appended so far.
    pub fn written_offset(&self) -> Offset {
        self.written.load(Ordering::Acquire)
    }

    /// Force appended data to disk.
    pub async fn sync(&self) -> Result<()> {
        let mut appender = self.appender.lock().await;
        appender.file.sync_data().await?;
        appender.last_sync = Instant::now();
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn maybe_sync(&self, appender: &mut Appender) -> Result<()> {
        let due = match self.sync_policy {
            SyncPolicy::Always => true,
            SyncPolicy::Interval { interval } => appender.last_sync.elapsed() >= interval,
            SyncPolicy::Never => false,
        };
        if due {
            appender.file.sync_data().await?;
            appender.last_sync = Instant::now();
        }
        Ok(())
    }
}

/// Drop everything past `offset` and continue writing from there.
async fn rewind(file: &mut File, offset: Offset) -> Result<()> {
    file.set_len(offset).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    Ok(())
}

fn encode_header() -> [u8; HEADER_LEN as usize] {
    let mut header = [0u8; HEADER_LEN as usize];
    header[..6].copy_from_slice(LOG_MAGIC);
    header[6..].copy_from_slice(&LOG_VERSION.to_le_bytes());
    header
}

/// Serialize a record into a checksummed frame.
fn encode_frame(record: &Record) -> Result<Vec<u8>> {
    let payload = bincode::serialize(record).map_err(|e| Error::Codec(e.to_string()))?;
    let payload_len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| Error::Codec(format!("record of {} bytes is too large", payload.len())))?;

    let mut crc = crc32fast::Hasher::new();
    crc.update(&payload);
    let checksum = crc.finalize();

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN as usize + payload.len());
    frame.extend_from_slice(&payload_len.to_le_bytes());
    frame.extend_from_slice(&checksum.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame> {
    let mut header = [0u8; FRAME_HEADER_LEN as usize];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(Frame::Truncated),
        Err(e) => return Err(e.into()),
    }

    let payload_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let stored_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if payload_len > MAX_FRAME_LEN {
        return Ok(Frame::Invalid);
    }

    let mut payload = vec![0u8; payload_len as usize];
    match reader.read_exact(&mut payload).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(Frame::Truncated),
        Err(e) => return Err(e.into()),
    }

    let mut crc = crc32fast::Hasher::new();
    crc.update(&payload);
    if crc.finalize() != stored_crc {
        return Ok(Frame::Invalid);
    }

    match bincode::deserialize::<Record>(&payload) {
        Ok(record) => Ok(Frame::Record {
            record,
            len: FRAME_HEADER_LEN + payload_len as u64,
        }),
        Err(_) => Ok(Frame::Invalid),
    }
}

/// Validate the header and return the offset just past the last intact frame.
async fn scan(path: &Path, file_len: u64) -> Result<Offset> {
    let file = File::open(path).await?;
    let mut reader = BufReader::new(file);

    let mut header = [0u8; HEADER_LEN as usize];
    reader.read_exact(&mut header).await?;
    if &header[..6] != LOG_MAGIC {
        return Err(Error::Corrupted { offset: 0 });
    }
    let version = u16::from_le_bytes([header[6], header[7]]);
    if version != LOG_VERSION {
        return Err(Error::Codec(format!(
            "unsupported record log version {}",
            version
        )));
    }

    let mut pos = HEADER_LEN;
    let mut frames = 0u64;
    while pos < file_len {
        match read_frame(&mut reader).await? {
            Frame::Record { len, .. } => {
                pos += len;
                frames += 1;
            }
            Frame::Truncated | Frame::Invalid => break,
        }
    }

    debug!(path = ?path, frames, valid_end = pos, "Scanned record log");
    Ok(pos)
}
