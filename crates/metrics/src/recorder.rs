//! Recorder initialization.

use {anyhow::Result, tracing::info};

/// Handle to the installed Prometheus recorder.
#[derive(Clone)]
pub struct MetricsHandle {
    prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

impl MetricsHandle {
    /// Render the scrape body in Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }
}

/// Install the global Prometheus recorder. Call once at startup; a second
/// call fails because the facade only accepts one global recorder.
pub fn init_metrics() -> Result<MetricsHandle> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(MetricsHandle {
        prometheus_handle: handle,
    })
}
