use std::sync::OnceLock;

use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);

    describe_counter!("grading_jobs_total", "Per-student grading jobs by outcome");
    describe_histogram!(
        "grading_duration_seconds",
        Unit::Seconds,
        "Wall time of one grader call including persistence"
    );
    describe_counter!("reports_written_total", "Report documents written to the report store");
    describe_counter!("orchestrations_total", "Orchestration instances by kind and final status");

    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}
