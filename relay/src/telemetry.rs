use crate::config::{CommonConfig, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::{StatsdBuilder, StatsdError};
use shared::metrics_defs::describe_all;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;

const METRICS_PREFIX: &str = "relay";

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    InvalidFilter(#[from] ParseError),
    #[error("could not install log subscriber: {0}")]
    Subscriber(#[from] TryInitError),
    #[error("could not build statsd exporter: {0}")]
    Statsd(#[from] StatsdError),
    #[error("a global metrics recorder is already installed")]
    RecorderInstalled,
}

/// Keeps Sentry flushing until dropped at the end of `main`.
pub struct TelemetryGuard {
    _sentry: Option<sentry::ClientInitGuard>,
}

pub fn init(config: &CommonConfig) -> Result<TelemetryGuard, TelemetryError> {
    let guard = init_logging(&config.logging)?;

    if let Some(metrics) = &config.metrics {
        init_metrics(metrics)?;
        tracing::info!(
            host = %metrics.statsd_host,
            port = metrics.statsd_port,
            "Sending metrics to statsd"
        );
    }

    Ok(guard)
}

/// `RUST_LOG` wins over the configured level when it is set.
fn env_filter(env: Option<&str>, level: &str) -> Result<EnvFilter, ParseError> {
    match env {
        Some(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives),
        _ => EnvFilter::try_new(level),
    }
}

fn init_logging(config: &LoggingConfig) -> Result<TelemetryGuard, TelemetryError> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = env_filter(rust_log.as_deref(), &config.level)?;

    let sentry_guard = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    let sentry_layer = sentry_guard
        .is_some()
        .then(sentry::integrations::tracing::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .try_init()?;

    if sentry_guard.is_some() {
        tracing::info!("Sentry error reporting enabled");
    }

    Ok(TelemetryGuard {
        _sentry: sentry_guard,
    })
}

fn init_metrics(config: &MetricsConfig) -> Result<(), TelemetryError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(METRICS_PREFIX))?;
    metrics::set_global_recorder(recorder).map_err(|_| TelemetryError::RecorderInstalled)?;

    describe_all(platform::metrics_defs::ALL_METRICS);
    describe_all(webhooks::metrics_defs::ALL_METRICS);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_prefers_rust_log() {
        let filter = env_filter(Some("webhooks=debug"), "info").unwrap();
        assert_eq!(filter.to_string(), "webhooks=debug");

        let filter = env_filter(None, "warn").unwrap();
        assert_eq!(filter.to_string(), "warn");

        let filter = env_filter(Some("  "), "error").unwrap();
        assert_eq!(filter.to_string(), "error");
    }

    #[test]
    fn invalid_level_rejected() {
        assert!(env_filter(None, "relay=loud").is_err());
    }
}
