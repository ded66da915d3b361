use std::net::SocketAddr;
use tracing::{info, warn};

pub const CANDIDATES_CLASSIFIED: &str = "pipeline_candidates_classified_total";
pub const CONCERTS_PROMOTED: &str = "pipeline_concerts_promoted_total";
pub const CONCERTS_DETAILED: &str = "pipeline_concerts_detailed_total";
pub const COMPOSER_NAMES_RESOLVED: &str = "pipeline_composer_names_resolved_total";
pub const INTAKE_RECORDS: &str = "pipeline_intake_records_total";
pub const ORACLE_REQUESTS: &str = "pipeline_oracle_requests_total";
pub const STAGE_FAILURES: &str = "pipeline_stage_failures_total";

/// Installs the Prometheus exporter when `PIPELINE_METRICS_PORT` is set.
/// Without it the counters go to the no-op recorder.
pub fn init_metrics() {
    let Some(port) = std::env::var("PIPELINE_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
    else {
        return;
    };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => info!(%addr, "Prometheus exporter listening on /metrics"),
        Err(e) => warn!("Prometheus exporter install failed (possibly already installed): {}", e),
    }
}

pub fn record_classification(classical: bool) {
    let outcome = if classical { "classical" } else { "other" };
    ::metrics::counter!(CANDIDATES_CLASSIFIED, "outcome" => outcome).increment(1);
}

pub fn record_promotion(inserted: u64, skipped: u64) {
    ::metrics::counter!(CONCERTS_PROMOTED, "outcome" => "inserted").increment(inserted);
    ::metrics::counter!(CONCERTS_PROMOTED, "outcome" => "skipped").increment(skipped);
}

pub fn record_extraction() {
    ::metrics::counter!(CONCERTS_DETAILED).increment(1);
}

pub fn record_resolution(method: &'static str) {
    ::metrics::counter!(COMPOSER_NAMES_RESOLVED, "method" => method).increment(1);
}

pub fn record_intake(target: &'static str, inserted: u64, skipped: u64) {
    ::metrics::counter!(INTAKE_RECORDS, "target" => target, "outcome" => "inserted")
        .increment(inserted);
    ::metrics::counter!(INTAKE_RECORDS, "target" => target, "outcome" => "skipped")
        .increment(skipped);
}

pub fn record_oracle_request(kind: &'static str, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    ::metrics::counter!(ORACLE_REQUESTS, "kind" => kind, "status" => status).increment(1);
}

pub fn record_stage_failure(stage: &'static str) {
    ::metrics::counter!(STAGE_FAILURES, "stage" => stage).increment(1);
}
