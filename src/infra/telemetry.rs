use std::io;
use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global tracing subscriber and describe the process metrics.
///
/// Events go to stderr; stdout carries command output only.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let events = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(event_filter(logging.level))
        .with(ErrorLayer::default())
        .with(events)
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("subscriber already installed: {err}")))
}

/// `RUST_LOG` wins over the configured level when it parses.
fn event_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "folio_cache_hit_total",
            Unit::Count,
            "Document reads served from the local cache."
        );
        describe_counter!(
            "folio_cache_miss_total",
            Unit::Count,
            "Document reads that went to the content host."
        );
        describe_counter!(
            "folio_cache_evict_total",
            Unit::Count,
            "Cache entries evicted due to capacity."
        );
        describe_counter!(
            "folio_write_attempt_total",
            Unit::Count,
            "Compare-and-swap write attempts, including retries."
        );
        describe_counter!(
            "folio_write_conflict_total",
            Unit::Count,
            "Write attempts rejected because the version token was stale."
        );
        describe_counter!(
            "folio_deploy_total",
            Unit::Count,
            "Deploy hook invocations."
        );
        describe_histogram!(
            "folio_write_ms",
            Unit::Milliseconds,
            "Time from the first write attempt to the commit, in milliseconds."
        );
    });
}
