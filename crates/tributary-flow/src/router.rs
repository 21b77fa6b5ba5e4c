//! Request/Response Router
//!
//! Lets callers wait on the reply to one specific request while a single
//! background loop drains the shared response channel.
//!
//! ## Architecture
//!
//! ```text
//! caller ── send_and_receive ──> requests channel ──> (component)
//!   │                                                     │
//!   │ MessageFuture::get                                  │
//!   │                                                     v
//!   └──── oneshot <── RouterTask (poll, match slot) <── responses channel
//! ```
//!
//! `send_and_receive` stamps the request with a fresh mailbox slot and
//! registers a waiter for it. The router loop reads responses with a bounded
//! wait; a response carrying a registered slot completes that waiter, anything
//! else is counted as unmatched and dropped.
//!
//! The loop checks its stop flag after every poll. When stopping, or when every
//! response sender is gone, it first drains responses already in the channel.

use crate::config::RouterConfig;
use crate::error::{FlowError, Result};
use crate::metrics::{ROUTER_POLL_TIMEOUTS_TOTAL, ROUTER_RESPONSES_TOTAL};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use tributary_core::Record;
use uuid::Uuid;

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Record>>>>;

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Record>>> {
    // Nothing panics while holding the lock, but don't wedge the router if it did
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sending half of the router, cheap to clone.
#[derive(Clone)]
pub struct MessageRouter {
    requests: mpsc::UnboundedSender<Record>,
    pending: PendingMap,
}

impl MessageRouter {
    /// Create a router over a request sender and a response receiver.
    ///
    /// The returned `RouterTask` must be spawned (or run) for responses to be
    /// delivered.
    pub fn new(
        config: RouterConfig,
        requests: mpsc::UnboundedSender<Record>,
        responses: mpsc::UnboundedReceiver<Record>,
    ) -> (Self, RouterTask) {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let task = RouterTask {
            config,
            responses,
            pending: pending.clone(),
            stop: Arc::new(AtomicBool::new(false)),
            closed: false,
            stats: RouterStats::default(),
        };
        (Self { requests, pending }, task)
    }

    /// Enqueue a request without waiting for a reply.
    pub fn send(&self, record: Record) -> Result<()> {
        self.requests
            .send(record)
            .map_err(|_| FlowError::ChannelClosed("router requests"))
    }

    /// Enqueue a request and return a future for its reply.
    pub fn send_and_receive(&self, mut record: Record) -> Result<MessageFuture> {
        let slot = Uuid::new_v4().to_string();
        record.control.mailbox_slot = Some(slot.clone());

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(slot.clone(), tx);

        if let Err(e) = self.send(record) {
            lock(&self.pending).remove(&slot);
            return Err(e);
        }

        Ok(MessageFuture {
            slot,
            receiver: rx,
            pending: self.pending.clone(),
        })
    }

    /// Requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

/// Reply to one `send_and_receive` call.
///
/// Dropping the future unregisters its slot; a reply that shows up afterwards
/// is counted as unmatched.
pub struct MessageFuture {
    slot: String,
    receiver: oneshot::Receiver<Record>,
    pending: PendingMap,
}

impl MessageFuture {
    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// Wait up to `timeout` for the reply.
    ///
    /// Returns `Ok(None)` on timeout and `ChannelClosed` if the router stopped
    /// without delivering one.
    pub async fn get(mut self, timeout: Duration) -> Result<Option<Record>> {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(record)) => Ok(Some(record)),
            Ok(Err(_)) => Err(FlowError::ChannelClosed("router")),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for MessageFuture {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.slot);
    }
}

/// Router loop counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub matched: u64,
    pub unmatched: u64,
    pub poll_timeouts: u64,
}

/// Consumer half of the router: owns the response receiver.
pub struct RouterTask {
    config: RouterConfig,
    responses: mpsc::UnboundedReceiver<Record>,
    pending: PendingMap,
    stop: Arc<AtomicBool>,
    closed: bool,
    stats: RouterStats,
}

impl RouterTask {
    /// Run the loop on a tokio task.
    pub fn spawn(self) -> RouterHandle {
        let stop = self.stop.clone();
        let join = tokio::spawn(self.run());
        RouterHandle { stop, join }
    }

    /// Flag checked by the loop after every poll.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    /// Poll the response channel once, waiting at most `poll_interval`.
    ///
    /// Returns `None` on timeout or when the channel is closed; neither is an
    /// error.
    pub async fn read_message(&mut self) -> Option<Record> {
        if self.closed {
            return None;
        }
        match tokio::time::timeout(self.config.poll_interval, self.responses.recv()).await {
            Ok(Some(record)) => Some(record),
            Ok(None) => {
                self.closed = true;
                None
            }
            Err(_) => {
                self.stats.poll_timeouts += 1;
                ROUTER_POLL_TIMEOUTS_TOTAL.inc();
                None
            }
        }
    }

    pub async fn run(mut self) -> RouterStats {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Router started"
        );

        loop {
            if let Some(record) = self.read_message().await {
                self.dispatch(record);
            }
            if self.closed || self.stop.load(Ordering::Acquire) {
                break;
            }
        }

        // Deliver what is already enqueued before going away
        while let Ok(record) = self.responses.try_recv() {
            self.dispatch(record);
        }

        // Remaining waiters see a closed channel
        let abandoned = {
            let mut pending = lock(&self.pending);
            let count = pending.len();
            pending.clear();
            count
        };

        info!(
            matched = self.stats.matched,
            unmatched = self.stats.unmatched,
            abandoned,
            "Router stopped"
        );
        self.stats
    }

    fn dispatch(&mut self, record: Record) {
        let waiter = record
            .control
            .mailbox_slot
            .as_deref()
            .and_then(|slot| lock(&self.pending).remove(slot));

        let delivered = match waiter {
            Some(tx) => tx.send(record).is_ok(),
            None => {
                debug!(kind = ?record.request_kind(), "Dropping response with no waiter");
                false
            }
        };

        if delivered {
            self.stats.matched += 1;
            ROUTER_RESPONSES_TOTAL.with_label_values(&["matched"]).inc();
        } else {
            self.stats.unmatched += 1;
            ROUTER_RESPONSES_TOTAL.with_label_values(&["unmatched"]).inc();
        }
    }
}

/// Handle to a spawned router loop.
pub struct RouterHandle {
    stop: Arc<AtomicBool>,
    join: JoinHandle<RouterStats>,
}

impl RouterHandle {
    /// Ask the loop to stop and wait for it to drain.
    pub async fn stop(self) -> Result<RouterStats> {
        self.stop.store(true, Ordering::Release);
        self.join
            .await
            .map_err(|e| FlowError::TaskFailed(e.to_string()))
    }

    /// Wait for the loop to exit on its own (response channel closed).
    pub async fn join(self) -> Result<RouterStats> {
        self.join
            .await
            .map_err(|e| FlowError::TaskFailed(e.to_string()))
    }
}
