//! Prometheus metrics for the flow control engine and router.
//!
//! Metrics live in a crate-local registry. Call `init()` once to register them
//! and `gather_text()` to render the registry in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Registry holding every tributary flow metric
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Flow Control Metrics
    // ============================================================================

    /// Records seen by the engine, by what happened to them
    pub static ref FLOW_RECORDS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("tributary_flow_records_total", "Records processed by flow control"),
        &["disposition"]
    ).expect("metric can be created");

    /// State transitions taken
    pub static ref FLOW_TRANSITIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("tributary_flow_transitions_total", "Flow control state transitions"),
        &["from", "to"]
    ).expect("metric can be created");

    /// Replay requests issued to the log
    pub static ref FLOW_RECOVERIES_TOTAL: IntCounter = IntCounter::new(
        "tributary_flow_recoveries_total",
        "Replay requests issued by flow control"
    ).expect("metric can be created");

    /// Bytes covered by replay requests
    pub static ref FLOW_RECOVERED_BYTES_TOTAL: IntCounter = IntCounter::new(
        "tributary_flow_recovered_bytes_total",
        "Log bytes requested for replay"
    ).expect("metric can be created");

    /// Progress marks sent to the sender
    pub static ref FLOW_MARKS_TOTAL: IntCounter = IntCounter::new(
        "tributary_flow_marks_total",
        "Sender marks forwarded"
    ).expect("metric can be created");

    /// Bytes forwarded but not yet reported by the sender
    pub static ref FLOW_BYTES_BEHIND: IntGauge = IntGauge::new(
        "tributary_flow_bytes_behind",
        "Forwarded bytes not yet confirmed by the sender"
    ).expect("metric can be created");

    // ============================================================================
    // Router Metrics
    // ============================================================================

    /// Responses read by the router loop
    pub static ref ROUTER_RESPONSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("tributary_router_responses_total", "Responses received by the router"),
        &["outcome"]
    ).expect("metric can be created");

    /// Polls that returned without a response
    pub static ref ROUTER_POLL_TIMEOUTS_TOTAL: IntCounter = IntCounter::new(
        "tributary_router_poll_timeouts_total",
        "Router polls that timed out"
    ).expect("metric can be created");
}

/// Register all metrics with `REGISTRY`.
pub fn init() {
    INIT.call_once(|| {
        // Flow control metrics
        REGISTRY
            .register(Box::new(FLOW_RECORDS_TOTAL.clone()))
            .expect("flow_records_total can be registered");
        REGISTRY
            .register(Box::new(FLOW_TRANSITIONS_TOTAL.clone()))
            .expect("flow_transitions_total can be registered");
        REGISTRY
            .register(Box::new(FLOW_RECOVERIES_TOTAL.clone()))
            .expect("flow_recoveries_total can be registered");
        REGISTRY
            .register(Box::new(FLOW_RECOVERED_BYTES_TOTAL.clone()))
            .expect("flow_recovered_bytes_total can be registered");
        REGISTRY
            .register(Box::new(FLOW_MARKS_TOTAL.clone()))
            .expect("flow_marks_total can be registered");
        REGISTRY
            .register(Box::new(FLOW_BYTES_BEHIND.clone()))
            .expect("flow_bytes_behind can be registered");

        // Router metrics
        REGISTRY
            .register(Box::new(ROUTER_RESPONSES_TOTAL.clone()))
            .expect("router_responses_total can be registered");
        REGISTRY
            .register(Box::new(ROUTER_POLL_TIMEOUTS_TOTAL.clone()))
            .expect("router_poll_timeouts_total can be registered");
    });
}

/// Render the registry in the Prometheus text format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        init();
        init();
    }

    #[test]
    fn test_gather_text_lists_flow_metrics() {
        init();
        FLOW_MARKS_TOTAL.inc();
        FLOW_RECORDS_TOTAL.with_label_values(&["forwarded"]).inc();

        let text = gather_text();
        assert!(text.contains("tributary_flow_marks_total"));
        assert!(text.contains("tributary_flow_records_total{disposition=\"forwarded\"}"));
    }

    #[test]
    fn test_counters_accumulate() {
        let before = FLOW_RECOVERED_BYTES_TOTAL.get();
        FLOW_RECOVERED_BYTES_TOTAL.inc_by(512);
        assert!(FLOW_RECOVERED_BYTES_TOTAL.get() >= before + 512);
    }
}
