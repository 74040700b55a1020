//! # Metrics
//!
//! Counters emitted by the gateway, exported in Prometheus format on a separate port:
//!
//! - `redirect_requests_total{outcome}`: `passthrough`, `redirected`, `denied` or `rejected`
//! - `admission_denials_total{subresource}`: connect requests refused by admission
//! - `forward_errors_total{cluster}`: requests that never got an upstream response

use metrics::{describe_counter, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

use crate::core::config::MetricsConfig;
use crate::core::error::{RedirectError, RedirectResult};

/// Install the Prometheus recorder and its HTTP listener
///
/// Must run inside a Tokio runtime. Does nothing when metrics are disabled.
pub fn init_metrics(config: &MetricsConfig, bind_address: &str) -> RedirectResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = format!("{}:{}", bind_address, config.port)
        .parse()
        .map_err(|e| RedirectError::config(format!("invalid metrics address: {}", e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| RedirectError::internal(format!("failed to install metrics exporter: {}", e)))?;

    describe_counter!(
        "redirect_requests_total",
        Unit::Count,
        "Requests seen by the redirect filter, by outcome"
    );
    describe_counter!(
        "admission_denials_total",
        Unit::Count,
        "Connect requests denied by admission"
    );
    describe_counter!(
        "forward_errors_total",
        Unit::Count,
        "Requests that failed before an upstream response"
    );

    info!(address = %addr, "Metrics exporter listening");
    Ok(())
}
