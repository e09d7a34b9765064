//! Metrics definitions for the relay gateway.
//!
//! This module defines all metrics keys used by the gateway and provides a
//! helper [`describe_metrics`] to set metadata for each metric using the
//! `metrics` crate.

/// Metrics key for counting currently running sessions.
pub const METRICS_ID_GATEWAY_SESSIONS_OPEN: &str = "relay.gateway.sessions.open";
/// Metrics key for counting successfully authenticated sessions.
pub const METRICS_ID_GATEWAY_HANDSHAKE_SUCCESS: &str = "relay.gateway.handshake.success";
/// Metrics key for counting sessions terminated during the handshake.
pub const METRICS_ID_GATEWAY_HANDSHAKE_FAILURE: &str = "relay.gateway.handshake.failure";
/// Metrics key for the duration of successful signature verification.
pub const METRICS_ID_GATEWAY_VERIFY_DURATION: &str = "relay.gateway.verify.duration";
/// Metrics key for counting messages accepted and published to the log.
pub const METRICS_ID_GATEWAY_MESSAGES_PUBLISHED: &str = "relay.gateway.messages.published";
/// Metrics key for the duration of publishing one message to every participant subject.
pub const METRICS_ID_GATEWAY_PUBLISH_DURATION: &str = "relay.gateway.publish.duration";
/// Metrics key for counting sync frames delivered to sessions.
pub const METRICS_ID_GATEWAY_SYNC_DELIVERED: &str = "relay.gateway.sync.delivered";

/// Describe all metrics used by the gateway.
///
/// This calls the `describe_*` functions from the `metrics` crate to set
/// metadata on the different metrics.
pub fn describe_metrics() {
    metrics::describe_gauge!(
        METRICS_ID_GATEWAY_SESSIONS_OPEN,
        metrics::Unit::Count,
        "Number of currently open sessions"
    );

    metrics::describe_counter!(
        METRICS_ID_GATEWAY_HANDSHAKE_SUCCESS,
        metrics::Unit::Count,
        "Number of successfully authenticated sessions"
    );

    metrics::describe_counter!(
        METRICS_ID_GATEWAY_HANDSHAKE_FAILURE,
        metrics::Unit::Count,
        "Number of sessions terminated during the handshake"
    );

    metrics::describe_histogram!(
        METRICS_ID_GATEWAY_VERIFY_DURATION,
        metrics::Unit::Milliseconds,
        "Duration of successful signature verification"
    );

    metrics::describe_counter!(
        METRICS_ID_GATEWAY_MESSAGES_PUBLISHED,
        metrics::Unit::Count,
        "Number of messages accepted and published to the log"
    );

    metrics::describe_histogram!(
        METRICS_ID_GATEWAY_PUBLISH_DURATION,
        metrics::Unit::Milliseconds,
        "Duration of publishing one message to every participant subject"
    );

    metrics::describe_counter!(
        METRICS_ID_GATEWAY_SYNC_DELIVERED,
        metrics::Unit::Count,
        "Number of sync frames delivered to sessions"
    )
}
