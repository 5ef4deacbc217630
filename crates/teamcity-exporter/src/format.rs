//! Supported metrics exposition formats.

use prometheus_client::{encoding::text, registry::Registry};

use std::fmt;

/// Metrics exposition format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, clap::ValueEnum)]
#[non_exhaustive]
pub enum Format {
    /// [OpenMetrics text format][om]. This is the format natively produced by [`prometheus-client`].
    ///
    /// [om]: https://github.com/OpenObservability/OpenMetrics/blob/main/specification/OpenMetrics.md
    /// [`prometheus-client`]: https://docs.rs/prometheus-client/
    OpenMetrics,
    /// [Prometheus text format][prom]. Since the exporter only reports gauges, it only differs
    /// from the OpenMetrics format by the lack of the `# EOF` terminator.
    ///
    /// [prom]: https://prometheus.io/docs/instrumenting/exposition_formats/
    #[default]
    Prometheus,
}

impl Format {
    /// Content type for the OpenMetrics text format.
    pub const OPEN_METRICS_CONTENT_TYPE: &'static str =
        "application/openmetrics-text; version=1.0.0; charset=utf-8";
    /// Content type for the Prometheus text format.
    pub const PROMETHEUS_CONTENT_TYPE: &'static str = "text/plain; version=0.0.4; charset=utf-8";

    /// Returns the HTTP content type for this format.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::OpenMetrics => Self::OPEN_METRICS_CONTENT_TYPE,
            Self::Prometheus => Self::PROMETHEUS_CONTENT_TYPE,
        }
    }

    /// Encodes all metrics in the `registry`. This will run collectors registered in the registry,
    /// which may block.
    pub(crate) fn encode(self, registry: &Registry) -> Result<String, fmt::Error> {
        let mut buffer = String::with_capacity(1_024);
        match self {
            Self::OpenMetrics => text::encode(&mut buffer, registry)?,
            Self::Prometheus => text::encode_registry(&mut buffer, registry)?,
        }
        Ok(buffer)
    }
}
