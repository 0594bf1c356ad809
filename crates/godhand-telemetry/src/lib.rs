mod metrics;

pub use metrics::{HistogramSummary, MetricsRecorder, MetricsSnapshot};

use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "godhand_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines on stdout (server) instead of compact text (CLI).
    pub json: bool,
    /// Whether metrics recording is enabled.
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: true,
            metrics_enabled: true,
        }
    }
}

/// Handle to the process-wide telemetry state.
pub struct TelemetryGuard {
    metrics_recorder: Option<Arc<MetricsRecorder>>,
}

impl TelemetryGuard {
    /// Access the metrics recorder for recording and querying.
    pub fn metrics(&self) -> Option<Arc<MetricsRecorder>> {
        self.metrics_recorder.clone()
    }
}

/// Build the filter directive string from config ("info,godhand_engine=debug").
pub fn filter_directives(config: &TelemetryConfig) -> String {
    let mut filter_str = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter_str
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let directives = filter_directives(&config);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let text_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    // try_init: tests and embedders may already have a subscriber installed
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init();

    let metrics_recorder = config
        .metrics_enabled
        .then(|| Arc::new(MetricsRecorder::new()));

    TelemetryGuard { metrics_recorder }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives() {
        assert_eq!(filter_directives(&TelemetryConfig::default()), "info");
    }

    #[test]
    fn module_levels_appended() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![
                ("godhand_engine".into(), Level::DEBUG),
                ("godhand_server".into(), Level::TRACE),
            ],
            ..Default::default()
        };
        assert_eq!(
            filter_directives(&config),
            "warn,godhand_engine=debug,godhand_server=trace"
        );
    }

    #[test]
    fn metrics_disabled_yields_none() {
        let guard = init_telemetry(TelemetryConfig {
            metrics_enabled: false,
            ..Default::default()
        });
        assert!(guard.metrics().is_none());
    }
}
