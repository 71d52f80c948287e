//! Prometheus metrics exposition
//!
//! - `gateway_http_requests_total` (counter): labels `route`, `status`
//! - `gateway_http_request_duration_seconds` (histogram): label `route`
//! - `gateway_authorizations_total` (counter): label `outcome`
//! - `gateway_token_checks_total` (counter): label `outcome`

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_METRIC: &str = "gateway_http_request_duration_seconds";

/// Most requests are local; provider round trips dominate the upper buckets.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a completed HTTP request against its matched route.
pub fn record_request(route: &str, status: u16, duration_secs: f64) {
    metrics::counter!(
        "gateway_http_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(DURATION_METRIC, "route" => route.to_string()).record(duration_secs);
}

/// Record a consent-flow step: `requested`, `completed`, `denied`, `failed`,
/// `foreign` or `rejected`.
pub fn record_authorization(outcome: &str) {
    metrics::counter!("gateway_authorizations_total", "outcome" => outcome.to_string())
        .increment(1);
}

/// Record a freshness check: `valid`, `refreshed`, `revoked` or `error`.
pub fn record_token_check(outcome: &str) {
    metrics::counter!("gateway_token_checks_total", "outcome" => outcome.to_string())
        .increment(1);
}

#[cfg(test)]
pub(crate) fn test_handle() -> PrometheusHandle {
    builder().unwrap().build_recorder().handle()
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    /// Isolated recorder; `install_recorder()` may only run once per process.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_request("/health", 200, 0.01);
        record_authorization("requested");
        record_token_check("valid");
    }

    #[test]
    fn request_metrics_carry_route_and_status() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("/oauth/callback", 303, 0.2);
        record_request("/admin/credentials/{id}", 404, 0.001);

        let output = handle.render();
        assert!(output.contains("gateway_http_requests_total"));
        assert!(output.contains("route=\"/oauth/callback\""));
        assert!(output.contains("status=\"303\""));
        assert!(output.contains("status=\"404\""));
        assert!(
            output.contains("gateway_http_request_duration_seconds_bucket"),
            "histogram must render _bucket lines"
        );
        assert!(output.contains("le=\"30\""));
    }

    #[test]
    fn flow_counters_carry_outcome() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_authorization("completed");
        record_authorization("denied");
        record_token_check("refreshed");

        let output = handle.render();
        assert!(output.contains("gateway_authorizations_total{outcome=\"completed\"} 1"));
        assert!(output.contains("gateway_authorizations_total{outcome=\"denied\"} 1"));
        assert!(output.contains("gateway_token_checks_total{outcome=\"refreshed\"} 1"));
    }
}
