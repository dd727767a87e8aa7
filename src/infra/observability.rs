//! Logging and Prometheus metrics setup.
//!
//! Counters emitted by the adapters:
//! `pg_adapter_queries_total{kind}`, `pg_adapter_query_errors_total{kind}`,
//! `pg_adapter_type_cache_misses_total`, `pg_adapter_transactions_total{outcome}`
//! and `pg_adapter_pool_errors_total`.

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Prometheus handle for on-demand scrape output.
pub type PrometheusHandle = metrics_exporter_prometheus::PrometheusHandle;

/// Install the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` (default `info`); `LOG_FORMAT=json`
/// switches to JSON lines. Calling it twice is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
}

/// Install the global metrics recorder and return a handle for rendering.
///
/// No HTTP listener is started; callers render with `handle.render()`.
///
/// # Errors
/// Returns an error if a recorder is already installed or building fails.
pub fn init_metrics() -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().install_recorder()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing();
        init_tracing();
    }

    #[test]
    fn test_metrics_render_after_install() {
        // Only one recorder can be installed per process.
        if let Ok(handle) = init_metrics() {
            metrics::counter!("pg_adapter_pool_errors_total").increment(1);
            assert!(handle.render().contains("pg_adapter_pool_errors"));
        }
    }
}
