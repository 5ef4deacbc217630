//! Prometheus exporter for TeamCity server metrics based on the `hyper` web server.
//!
//! The exporter serves metrics from a [`prometheus_client`] registry. Metrics are produced on each
//! scrape by collectors explicitly injected into the exporter, such as
//! [`TeamcityCollector`](teamcity_metrics::TeamcityCollector).
//!
//! # Examples
//!
//! ```no_run
//! use prometheus_client::collector::Collector;
//! use teamcity_exporter::MetricsExporter;
//! use teamcity_metrics::{Credentials, HttpUpstream, TeamcityCollector, UpstreamTarget};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Credentials::new("exporter", "secret");
//! let upstream = HttpUpstream::new(credentials, HttpUpstream::DEFAULT_TIMEOUT)?;
//! let target = UpstreamTarget::new("https://teamcity.example.com");
//! let collector = TeamcityCollector::new(target, upstream);
//!
//! let runtime = tokio::runtime::Runtime::new()?;
//! runtime.block_on(async {
//!     let exporter = MetricsExporter::from_collectors([Box::new(collector) as Box<dyn Collector>]);
//!     exporter.start("0.0.0.0:9190".parse()?).await?;
//!     Ok::<_, Box<dyn std::error::Error>>(())
//! })
//! # }
//! ```

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub use crate::{
    config::{ConfigError, ExporterArgs, ExporterConfig},
    exporter::{MetricsExporter, MetricsServer},
    format::Format,
};

mod config;
mod exporter;
mod format;
