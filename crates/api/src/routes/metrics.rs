//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics::Unit;
use metrics_exporter_prometheus::PrometheusHandle;

/// Registers descriptions for the transfer metrics so they carry help text
/// in the exposition output.
pub fn describe() {
    metrics::describe_counter!(
        "transfer_attempts_total",
        "Transfer attempts started, including retries"
    );
    metrics::describe_counter!(
        "transfer_retries_total",
        "Attempts retried after a transient conflict"
    );
    metrics::describe_counter!("transfers_completed_total", "Transfers that committed");
    metrics::describe_counter!(
        "transfers_failed_total",
        "Transfers that ended in an error, by reason"
    );
    metrics::describe_histogram!(
        "transfer_duration_seconds",
        Unit::Seconds,
        "Wall-clock time of a transfer across all attempts"
    );
}

/// GET /metrics: returns Prometheus-formatted metrics.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}
