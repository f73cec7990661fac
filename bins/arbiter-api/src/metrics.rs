// Prometheus metrics exposed on GET /metrics

use arbiter_common::types::Verdict;
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    pub static ref EVALUATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "arbiter_evaluations_total",
        "Evaluation requests by action and outcome",
        &["action", "outcome"]
    )
    .expect("metric can be registered");
    pub static ref SANDBOX_RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "arbiter_sandbox_runs_total",
        "Program executions by verdict",
        &["verdict"]
    )
    .expect("metric can be registered");
    pub static ref EVALUATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "arbiter_evaluation_duration_seconds",
        "Wall time of evaluation requests",
        &["action"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("metric can be registered");
}

pub fn record_evaluation(action: &str, outcome: &str, seconds: f64) {
    EVALUATIONS_TOTAL.with_label_values(&[action, outcome]).inc();
    EVALUATION_DURATION_SECONDS
        .with_label_values(&[action])
        .observe(seconds);
}

pub fn record_verdict(verdict: Verdict) {
    SANDBOX_RUNS_TOTAL
        .with_label_values(&[verdict.as_str()])
        .inc();
}

/// Render every registered metric in the text exposition format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_series() {
        record_evaluation("visible", "ok", 0.2);
        record_verdict(Verdict::TimeLimitExceeded);

        let text = render();
        assert!(text.contains("arbiter_evaluations_total"));
        assert!(text.contains("verdict=\"time_limit_exceeded\""));
        assert!(text.contains("arbiter_evaluation_duration_seconds_bucket"));
    }
}
