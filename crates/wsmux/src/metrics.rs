use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};

// Create a new registry named `wsmux`
lazy_static! {
    pub static ref WSMUX_REGISTRY: Registry =
        Registry::new_custom(Some("wsmux".to_string()), None).unwrap();
}

// Register metrics with the `wsmux` registry
lazy_static! {
    pub static ref FRAMES_RECEIVED: IntCounterVec = register_int_counter_vec_with_registry!(
        "frames_received_total",
        "Inbound frames by classification",
        &["kind"],
        WSMUX_REGISTRY
    )
    .unwrap();
    pub static ref FRAMES_SENT: IntCounter = register_int_counter_with_registry!(
        "frames_sent_total",
        "Outbound frames handed to the socket",
        WSMUX_REGISTRY
    )
    .unwrap();
    pub static ref SENDS_DROPPED: IntCounterVec = register_int_counter_vec_with_registry!(
        "sends_dropped_total",
        "Outbound messages discarded before reaching the socket",
        &["reason"],
        WSMUX_REGISTRY
    )
    .unwrap();
    pub static ref CONNECTION_FAILURES: IntCounterVec = register_int_counter_vec_with_registry!(
        "connection_failures_total",
        "Unplanned connection closes by kind",
        &["kind"],
        WSMUX_REGISTRY
    )
    .unwrap();
    pub static ref RECONNECT_ATTEMPTS: IntCounter = register_int_counter_with_registry!(
        "reconnect_attempts_total",
        "Automatic reconnect attempts",
        WSMUX_REGISTRY
    )
    .unwrap();
    pub static ref RECONNECT_EXHAUSTED: IntCounter = register_int_counter_with_registry!(
        "reconnect_exhausted_total",
        "Times the reconnect policy gave up",
        WSMUX_REGISTRY
    )
    .unwrap();
    pub static ref CONNECTION_STATUS: IntGauge = register_int_gauge_with_registry!(
        "connection_open",
        "1 while the connection is open, 0 otherwise",
        WSMUX_REGISTRY
    )
    .unwrap();
}

/// Render every registered metric in the prometheus text format
pub fn gather() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&WSMUX_REGISTRY.gather(), &mut buffer) {
        tracing::warn!("Failed to encode metrics: {err}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_registry_prefix() {
        FRAMES_SENT.inc();
        FRAMES_RECEIVED.with_label_values(&["message"]).inc();
        let text = gather();
        assert!(text.contains("wsmux_frames_sent_total"));
        assert!(text.contains("wsmux_frames_received_total{kind=\"message\"}"));
    }
}
