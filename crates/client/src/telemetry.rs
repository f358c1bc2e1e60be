//! Client metrics.
//!
//! Counters are recorded through the `metrics` facade. No recorder is
//! installed by default; an embedding application installs its own.

use metrics::{counter, histogram};

use crate::transport::Method;

/// Records one REST call.
///
/// - `farmtrack_api_requests_total`: Counter with labels (method, status)
/// - `farmtrack_api_request_duration_seconds`: Histogram with label (method)
pub fn record_api_request(method: Method, status: Option<u16>, duration_secs: f64) {
    let status = status.map_or_else(|| "network_error".to_string(), |s| s.to_string());
    counter!(
        "farmtrack_api_requests_total",
        "method" => method.as_str(),
        "status" => status
    )
    .increment(1);

    histogram!(
        "farmtrack_api_request_duration_seconds",
        "method" => method.as_str()
    )
    .record(duration_secs);
}

pub fn record_token_refresh(success: bool) {
    counter!(
        "farmtrack_token_refresh_total",
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

pub fn record_poll(feed: &'static str, success: bool) {
    counter!(
        "farmtrack_polls_total",
        "feed" => feed,
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

pub fn record_rejected_samples(count: usize) {
    counter!("farmtrack_rejected_samples_total").increment(count as u64);
}

pub fn record_alert_raised(alert_type: &'static str) {
    counter!("farmtrack_alerts_raised_total", "type" => alert_type).increment(1);
}
