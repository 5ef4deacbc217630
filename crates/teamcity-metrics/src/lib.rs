//! Collection of TeamCity server metrics based on the `prometheus-client` crate.
//!
//! # Overview
//!
//! - [`MetricCatalog`] is a static, ordered list of [`MetricDefinition`]s: metric name, help,
//!   the REST API path to query and the JSON key holding the metric value.
//! - [`TeamcityCollector`] queries TeamCity for each catalog entry on every scrape and produces
//!   a gauge [`Sample`] for each resolved entry, followed by the [`SCRAPE_ERROR_METRIC`] gauge.
//!   The collector implements [`Collector`](prometheus_client::collector::Collector), so it can be
//!   registered in a [`Registry`](prometheus_client::registry::Registry).
//! - Requests are performed by an [`Upstream`]; [`HttpUpstream`] is the blocking HTTP implementation
//!   with basic authentication.
//!
//! # Examples
//!
//! ```no_run
//! use prometheus_client::{encoding::text, registry::Registry};
//! use teamcity_metrics::{Credentials, HttpUpstream, TeamcityCollector, UpstreamTarget};
//!
//! let credentials = Credentials::new("exporter", "secret");
//! let upstream = HttpUpstream::new(credentials, HttpUpstream::DEFAULT_TIMEOUT)?;
//! let target = UpstreamTarget::new("https://teamcity.example.com/");
//! let collector = TeamcityCollector::new(target, upstream);
//!
//! let mut registry = Registry::default();
//! registry.register_collector(Box::new(collector));
//! let mut buffer = String::new();
//! text::encode(&mut buffer, &registry)?;
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub use crate::{
    catalog::{MetricCatalog, MetricDefinition, SCRAPE_ERROR_DESCRIPTION, SCRAPE_ERROR_METRIC},
    collector::{extract_value, ExtractError, Sample, ScrapeOutcome, ScrapePass, TeamcityCollector},
    upstream::{Credentials, FetchError, HttpUpstream, Upstream, UpstreamTarget},
};

mod catalog;
mod collector;
#[cfg(test)]
mod tests;
mod upstream;
