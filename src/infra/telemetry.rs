use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::authz::METRIC_GRANT_DECISION;
use crate::application::hooks::METRIC_HOOK_SUBSCRIBER_ERROR;
use crate::application::identity::METRIC_IDENTITY_CONFLICT;
use crate::cache::{
    METRIC_CACHE_BACKEND_ERROR, METRIC_CACHE_HIT, METRIC_CACHE_MISS, METRIC_CACHE_SWEEP_KEYS,
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
            METRIC_CACHE_HIT,
            Unit::Count,
            "Total number of entity cache hits."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Total number of entity cache misses, including undecodable entries."
        );
        describe_counter!(
            METRIC_CACHE_BACKEND_ERROR,
            Unit::Count,
            "Total number of cache backend failures degraded to a miss."
        );
        describe_counter!(
            METRIC_CACHE_SWEEP_KEYS,
            Unit::Count,
            "Total number of keys removed by prefix sweeps."
        );
        describe_counter!(
            METRIC_HOOK_SUBSCRIBER_ERROR,
            Unit::Count,
            "Total number of hook subscribers that failed or panicked."
        );
        describe_counter!(
            METRIC_GRANT_DECISION,
            Unit::Count,
            "Total number of authorization decisions by source."
        );
        describe_counter!(
            METRIC_IDENTITY_CONFLICT,
            Unit::Count,
            "Total number of requested primary keys that were already occupied."
        );
    });
}
