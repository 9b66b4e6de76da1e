//! Prometheus metrics for gate decisions.
//!
//! Counters are recorded through the `metrics` facade; the Prometheus recorder is installed
//! once per process and rendered at `/internal/metrics`.

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::warn;

pub const DECISIONS_TOTAL: &str = "authgate_decisions_total";

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder on first use and return its handle.
pub fn get_or_install_prometheus_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if metrics::set_global_recorder(recorder).is_err() {
                warn!("Another metrics recorder is already installed, gate metrics will not be exported");
            }
            describe_counter!(DECISIONS_TOTAL, "Gate decisions by outcome");
            handle
        })
        .clone()
}

/// Count one gate decision. `outcome` is `bypassed`, `allowed`, or the rejection reason code.
pub fn record_decision(outcome: &'static str) {
    counter!(DECISIONS_TOTAL, "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decisions_are_rendered() {
        let handle = get_or_install_prometheus_handle();

        record_decision("forbidden");
        record_decision("forbidden");
        record_decision("allowed");

        let rendered = handle.render();
        assert!(rendered.contains(r#"authgate_decisions_total{outcome="forbidden"}"#));
        assert!(rendered.contains(r#"authgate_decisions_total{outcome="allowed"}"#));
    }

    #[test]
    fn test_handle_is_shared() {
        let first = get_or_install_prometheus_handle();
        record_decision("token_expired");
        let second = get_or_install_prometheus_handle();
        assert!(second.render().contains(r#"outcome="token_expired""#));
        drop(first);
    }
}
