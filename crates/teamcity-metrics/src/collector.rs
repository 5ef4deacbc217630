//! Scrape-time collection of TeamCity metrics.

use prometheus_client::{
    collector::Collector as CollectorTrait,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::gauge::ConstGauge,
};
use serde_json::Value;

use std::{fmt, slice};

use crate::{
    catalog::{MetricCatalog, MetricDefinition, SCRAPE_ERROR_DESCRIPTION, SCRAPE_ERROR_METRIC},
    upstream::{Upstream, UpstreamTarget},
};

/// Single gauge value produced during a scrape pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Metric name.
    pub name: &'static str,
    /// Metric description.
    pub description: &'static str,
    /// Gauge value.
    pub value: f64,
}

impl Sample {
    /// Creates a sample.
    pub const fn new(name: &'static str, description: &'static str, value: f64) -> Self {
        Self {
            name,
            description,
            value,
        }
    }
}

/// Outcome of a scrape pass that is reported as the scrape error gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeOutcome {
    /// `false` if the first request of the pass has failed.
    pub upstream_reachable: bool,
}

impl ScrapeOutcome {
    /// Converts this outcome to the scrape error sample (1 if TeamCity was unreachable, 0 otherwise).
    pub fn to_sample(self) -> Sample {
        let value = if self.upstream_reachable { 0.0 } else { 1.0 };
        Sample::new(SCRAPE_ERROR_METRIC, SCRAPE_ERROR_DESCRIPTION, value)
    }
}

/// Error extracting a metric value from a TeamCity response.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// Response is not valid JSON.
    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The value key is missing from the response.
    #[error("response has no `{key}` key")]
    MissingKey {
        /// Missing key.
        key: &'static str,
    },
    /// The value under the key is not a number.
    #[error("value `{value}` at `{key}` is not a number")]
    NotNumeric {
        /// Value key.
        key: &'static str,
        /// Value found under the key.
        value: Value,
    },
}

/// Extracts a numeric value at `key` from a JSON object in `body`.
///
/// # Errors
///
/// Returns an error if `body` is not JSON, or `key` is missing or does not hold a number.
pub fn extract_value(body: &str, key: &'static str) -> Result<f64, ExtractError> {
    let response: Value = serde_json::from_str(body)?;
    let value = response.get(key).ok_or(ExtractError::MissingKey { key })?;
    value.as_f64().ok_or_else(|| ExtractError::NotNumeric {
        key,
        value: value.clone(),
    })
}

/// Collector of TeamCity metrics.
///
/// Each call to [`Self::collect()`] queries TeamCity for every entry in the [`MetricCatalog`],
/// in catalog order, one request at a time. The collector holds no state mutated during scraping,
/// so concurrent scrapes are independent.
///
/// # Failure handling
///
/// - If the *first* request of a pass fails (including non-successful HTTP statuses),
///   TeamCity is considered unreachable; the remaining entries are skipped and the pass
///   reports [`SCRAPE_ERROR_METRIC`] = 1.
/// - All other failures (malformed JSON, missing / non-numeric value, failed non-first
///   requests) are logged and only drop the affected metric.
#[derive(Debug)]
pub struct TeamcityCollector<U> {
    target: UpstreamTarget,
    upstream: U,
    catalog: MetricCatalog,
}

impl<U: Upstream> TeamcityCollector<U> {
    /// Creates a collector for all metrics in [`MetricCatalog::teamcity()`].
    pub fn new(target: UpstreamTarget, upstream: U) -> Self {
        Self {
            target,
            upstream,
            catalog: MetricCatalog::teamcity(),
        }
    }

    /// Replaces the collected metrics catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: MetricCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Returns the TeamCity server this collector scrapes.
    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }

    /// Returns the upstream used to query TeamCity.
    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    /// Returns the catalog of collected metrics.
    pub fn catalog(&self) -> MetricCatalog {
        self.catalog
    }

    /// Starts a scrape pass. Requests are issued lazily as the returned iterator is advanced.
    pub fn collect(&self) -> ScrapePass<'_, U> {
        ScrapePass {
            collector: self,
            entries: self.catalog.iter(),
            attempted_requests: false,
            outcome: ScrapeOutcome {
                upstream_reachable: true,
            },
            finished: false,
        }
    }
}

/// Lazy iterator over [`Sample`]s produced by a single scrape pass.
///
/// Yields a sample for each successfully resolved catalog entry, followed by exactly one
/// scrape error sample.
#[must_use = "Scrape pass is lazy; it does nothing unless iterated"]
pub struct ScrapePass<'a, U> {
    collector: &'a TeamcityCollector<U>,
    entries: slice::Iter<'static, MetricDefinition>,
    attempted_requests: bool,
    outcome: ScrapeOutcome,
    finished: bool,
}

impl<U: fmt::Debug> fmt::Debug for ScrapePass<'_, U> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ScrapePass")
            .field("target", &self.collector.target)
            .field("remaining_entries", &self.entries.len())
            .field("outcome", &self.outcome)
            .field("finished", &self.finished)
            .finish()
    }
}

#[derive(Debug)]
enum EntryOutcome {
    Resolved(Sample),
    Skipped,
    Unreachable,
}

impl<U: Upstream> ScrapePass<'_, U> {
    /// Returns the outcome of the pass so far.
    pub fn outcome(&self) -> ScrapeOutcome {
        self.outcome
    }

    fn resolve(&mut self, definition: &MetricDefinition) -> EntryOutcome {
        let is_first_request = !self.attempted_requests;
        self.attempted_requests = true;

        let url = self.collector.target.url(definition.query_path);
        tracing::debug!(%url, metric = definition.name, "Sending TeamCity API request");
        let body = match self.collector.upstream.get(&url) {
            Ok(body) => body,
            Err(err) if is_first_request => {
                tracing::error!(%url, %err, "Error sending request to TeamCity; skipping scrape");
                return EntryOutcome::Unreachable;
            }
            Err(err) => {
                tracing::error!(
                    %url,
                    %err,
                    metric = definition.name,
                    "Error sending request to TeamCity"
                );
                return EntryOutcome::Skipped;
            }
        };
        tracing::debug!(%url, %body, "Received TeamCity API response");

        match extract_value(&body, definition.value_key) {
            Ok(value) => {
                EntryOutcome::Resolved(Sample::new(definition.name, definition.description, value))
            }
            Err(err @ ExtractError::Json(_)) => {
                tracing::error!(%url, %err, "Error parsing JSON response");
                EntryOutcome::Skipped
            }
            Err(err) => {
                tracing::error!(
                    %url,
                    %err,
                    response = %body,
                    key = definition.value_key,
                    "Error parsing metric value"
                );
                EntryOutcome::Skipped
            }
        }
    }
}

impl<U: Upstream> Iterator for ScrapePass<'_, U> {
    type Item = Sample;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        while let Some(definition) = self.entries.next() {
            match self.resolve(definition) {
                EntryOutcome::Resolved(sample) => return Some(sample),
                EntryOutcome::Skipped => { /* continue with the next entry */ }
                EntryOutcome::Unreachable => {
                    self.outcome.upstream_reachable = false;
                    break;
                }
            }
        }
        self.finished = true;
        Some(self.outcome.to_sample())
    }
}

impl<U: Upstream> CollectorTrait for TeamcityCollector<U> {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), fmt::Error> {
        for sample in self.collect() {
            let gauge = ConstGauge::new(sample.value);
            let metric_encoder = encoder.encode_descriptor(
                sample.name,
                sample.description,
                None,
                gauge.metric_type(),
            )?;
            gauge.encode(metric_encoder)?;
        }
        Ok(())
    }
}
