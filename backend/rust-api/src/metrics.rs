use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Business Metrics
    pub static ref HINTS_SERVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "hints_served_total",
        "Total number of hints served",
        &["cluster", "level"]
    )
    .unwrap();

    pub static ref HINT_REQUESTS_SKIPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "hint_requests_skipped_total",
        "Hint requests short-circuited before classification",
        &["reason"]
    )
    .unwrap();

    pub static ref FEEDBACK_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "feedback_events_total",
        "Score-delta feedback events attributed to a previous hint",
        &["improved"]
    )
    .unwrap();
}

/// Render all registered metrics in Prometheus text format.
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Invalid UTF-8 in metrics: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let _ = HINTS_SERVED_TOTAL
            .with_label_values(&["c_segfault", "1"])
            .get();
    }

    #[test]
    fn test_render_metrics() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let result = render_metrics();
        assert!(result.is_ok());
        let output = result.unwrap();
        assert!(output.contains("http_requests_total"));
    }
}
