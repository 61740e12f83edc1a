//! Metrics sink.
//!
//! Components that emit metrics receive an `Arc<dyn Stats>` instead of
//! reaching for process-wide registries. Services get [`MetricsStats`] when
//! metrics are enabled and [`NullStats`] otherwise; tests inject their own.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::config::MetricsConfig;
use crate::error::{Error, Result};

/// Metric tags: low-cardinality key/value pairs.
pub type Tags<'a> = &'a [(&'static str, String)];

/// Request-level instrumentation points.
pub trait Stats: Send + Sync + 'static {
    /// Increments the counter `name` by one.
    fn incr(&self, name: &str, tags: Tags<'_>);

    /// Records one latency observation.
    fn timing(&self, name: &str, elapsed: Duration, tags: Tags<'_>);

    /// Called once when the service stops. Sinks that buffer flush here.
    fn close(&self) {}
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullStats;

impl Stats for NullStats {
    fn incr(&self, _name: &str, _tags: Tags<'_>) {}
    fn timing(&self, _name: &str, _elapsed: Duration, _tags: Tags<'_>) {}
}

/// Forwards to the [`metrics`] facade, names prefixed with the configured
/// prefix. Timings are recorded as histograms in seconds.
#[derive(Clone, Debug)]
pub struct MetricsStats {
    prefix: String,
}

impl MetricsStats {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }
}

impl Stats for MetricsStats {
    fn incr(&self, name: &str, tags: Tags<'_>) {
        metrics::counter!(self.key(name), tags).increment(1);
    }

    fn timing(&self, name: &str, elapsed: Duration, tags: Tags<'_>) {
        metrics::histogram!(self.key(name), tags).record(elapsed.as_secs_f64());
    }

    /// Nothing to flush: the exporter is scraped. Only logs.
    fn close(&self) {
        info!("metrics sink closed");
    }
}

/// Installs the Prometheus exporter as the global `metrics` recorder,
/// scraping on `config.server`.
pub(crate) fn install_exporter(config: &MetricsConfig) -> Result<()> {
    let addr: SocketAddr = config.server.parse()
        .map_err(|_| Error::Addr(config.server.clone()))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .upkeep_timeout(Duration::from_millis(config.interval_ms))
        .install()
        .map_err(|e| Error::Metrics(e.to_string()))?;

    info!(%addr, "prometheus exporter listening");
    Ok(())
}
