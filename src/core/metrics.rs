// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the multiplexer and resource layer.
//!
//! This module uses `lazy_static` so that metrics are registered only once
//! globally, however many sessions a process creates.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, TextEncoder, register_counter, register_counter_vec,
    register_gauge,
};

lazy_static! {
    // --- Gauges ---
    /// Followers still receiving broadcasts.
    pub static ref LIVE_FOLLOWERS: Gauge =
        register_gauge!("lockstep_live_followers", "Number of followers still part of the fan-out.")
            .expect("lockstep_live_followers registers once");

    // --- Counters ---
    /// Broadcast frames sent by the head (counted once per operation, not per follower).
    pub static ref FRAMES_BROADCAST_TOTAL: Counter =
        register_counter!("lockstep_frames_broadcast_total", "Total number of broadcast operations.")
            .expect("lockstep_frames_broadcast_total registers once");
    /// Payload bytes broadcast by the head.
    pub static ref BYTES_BROADCAST_TOTAL: Counter =
        register_counter!("lockstep_bytes_broadcast_total", "Total payload bytes broadcast.")
            .expect("lockstep_bytes_broadcast_total registers once");
    /// Frames delivered to the application on either role.
    pub static ref FRAMES_RECEIVED_TOTAL: Counter =
        register_counter!("lockstep_frames_received_total", "Total number of frames received in order.")
            .expect("lockstep_frames_received_total registers once");
    /// Barriers completed.
    pub static ref BARRIERS_TOTAL: Counter =
        register_counter!("lockstep_barriers_total", "Total number of completed barriers.")
            .expect("lockstep_barriers_total registers once");
    /// Followers dropped from the fan-out after a transport failure.
    pub static ref FOLLOWERS_LOST_TOTAL: Counter =
        register_counter!("lockstep_followers_lost_total", "Total number of followers lost.")
            .expect("lockstep_followers_lost_total registers once");
    /// Sessions poisoned by an out-of-place frame.
    pub static ref PROTOCOL_DESYNCS_TOTAL: Counter =
        register_counter!("lockstep_protocol_desyncs_total", "Total number of protocol desyncs.")
            .expect("lockstep_protocol_desyncs_total registers once");

    // --- Labeled Counters ---
    /// Resources opened, labeled by scheme (`local`, `tcp`, `tls`, `http`) and outcome.
    pub static ref RESOURCES_OPENED_TOTAL: CounterVec =
        register_counter_vec!("lockstep_resources_opened_total", "Total number of resource opens.", &["kind", "outcome"])
            .expect("lockstep_resources_opened_total registers once");
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
