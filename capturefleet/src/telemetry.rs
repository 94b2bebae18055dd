//! Tracing setup. Deliberately plain - one process, one log stream, no OTLP
//! exporter - unlike `dwctl`'s heavier OpenTelemetry pipeline, this worker
//! has nothing downstream to export traces to.

use tracing_subscriber::EnvFilter;

pub fn init(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}
