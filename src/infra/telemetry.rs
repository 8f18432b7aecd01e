use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::stats::{
    METRIC_DOCUMENT_CACHE_HIT, METRIC_DOCUMENT_CACHE_MISS, METRIC_INCLUSION_CACHE_HIT,
    METRIC_INCLUSION_CACHE_MISS, METRIC_RENDER_DURATION_MS, METRIC_UPDATES_PROCESSED,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
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
            METRIC_DOCUMENT_CACHE_HIT,
            Unit::Count,
            "Total number of document cache hits."
        );
        describe_counter!(
            METRIC_DOCUMENT_CACHE_MISS,
            Unit::Count,
            "Total number of document cache misses."
        );
        describe_counter!(
            METRIC_INCLUSION_CACHE_HIT,
            Unit::Count,
            "Total number of file-inclusion cache hits."
        );
        describe_counter!(
            METRIC_INCLUSION_CACHE_MISS,
            Unit::Count,
            "Total number of file-inclusion cache misses."
        );
        describe_counter!(
            METRIC_UPDATES_PROCESSED,
            Unit::Count,
            "Total number of preview updates rendered and broadcast."
        );
        describe_histogram!(
            METRIC_RENDER_DURATION_MS,
            Unit::Milliseconds,
            "Render pipeline latency in milliseconds."
        );
    });
}
