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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "watchlazy_cache_hit_total",
            Unit::Count,
            "Cache reads answered by the active backend."
        );
        describe_counter!(
            "watchlazy_cache_miss_total",
            Unit::Count,
            "Cache reads that found no live entry."
        );
        describe_counter!(
            "watchlazy_cache_error_total",
            Unit::Count,
            "Remote cache operations that failed or timed out and were degraded."
        );
        describe_counter!(
            "watchlazy_cache_evict_total",
            Unit::Count,
            "Local cache entries evicted due to capacity."
        );
        describe_counter!(
            "watchlazy_query_resolved_total",
            Unit::Count,
            "Catalog queries by the tier that answered them."
        );
        describe_counter!(
            "watchlazy_source_retry_total",
            Unit::Count,
            "Source requests retried after a transient failure."
        );
        describe_histogram!(
            "watchlazy_fetch_ms",
            Unit::Milliseconds,
            "Aggregate fetch cycle latency in milliseconds."
        );
    });
}
