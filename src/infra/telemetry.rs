use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to standard error; standard output carries `optimize` results.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(std::io::stderr)
            .compact()
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pagewright_pages_optimized_total",
            Unit::Count,
            "Total number of pages run through the optimization pipeline."
        );
        describe_counter!(
            "pagewright_amp_bypass_total",
            Unit::Count,
            "Total number of AMP pages returned untouched."
        );
        describe_counter!(
            "pagewright_pass_applied_total",
            Unit::Count,
            "Total number of pass applications, labelled by pass."
        );
        describe_histogram!(
            "pagewright_optimize_ms",
            Unit::Milliseconds,
            "Optimization pipeline latency in milliseconds."
        );
        describe_counter!(
            "pagewright_capture_skipped_total",
            Unit::Count,
            "Total number of responses passed through without optimization, labelled by reason."
        );
        describe_counter!(
            "pagewright_bundle_written_total",
            Unit::Count,
            "Total number of combined bundles written to the output directory."
        );
        describe_counter!(
            "pagewright_bundle_pruned_total",
            Unit::Count,
            "Total number of unused bundles deleted from the output directory."
        );
        describe_histogram!(
            "pagewright_upstream_ms",
            Unit::Milliseconds,
            "Origin round-trip latency in milliseconds."
        );
    });
}
