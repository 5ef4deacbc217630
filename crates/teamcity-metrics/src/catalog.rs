//! Declarative catalog of metrics collected from TeamCity.

use std::slice;

/// Name of the gauge reporting whether a scrape pass failed to reach TeamCity.
pub const SCRAPE_ERROR_METRIC: &str = "teamcity_scrape_error";
/// Description of the [scrape error gauge](SCRAPE_ERROR_METRIC).
pub const SCRAPE_ERROR_DESCRIPTION: &str =
    "Whether the exporter failed to call TeamCity API methods";

/// Definition of a single metric obtained from the TeamCity REST API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDefinition {
    /// Full metric name as exposed to Prometheus.
    pub name: &'static str,
    /// Human-readable description, reported as metric help.
    pub description: &'static str,
    /// Path (incl. the query string) appended to the TeamCity base URL.
    pub query_path: &'static str,
    /// Key in the JSON response object holding the metric value.
    pub value_key: &'static str,
}

impl MetricDefinition {
    /// Creates a definition extracting the value from the `count` key, which is what
    /// TeamCity list endpoints return.
    pub const fn count(
        name: &'static str,
        description: &'static str,
        query_path: &'static str,
    ) -> Self {
        Self {
            name,
            description,
            query_path,
            value_key: "count",
        }
    }
}

const TEAMCITY_METRICS: &[MetricDefinition] = &[
    MetricDefinition::count(
        "teamcity_build_queue_length",
        "TeamCity Build Queue Length",
        "/app/rest/buildQueue",
    ),
    MetricDefinition::count(
        "teamcity_agents_count",
        "TeamCity Agents Count",
        "/app/rest/agents",
    ),
    MetricDefinition::count(
        "teamcity_disabled_agents_count",
        "TeamCity Disabled Agents Count",
        "/app/rest/agents?locator=enabled:false",
    ),
    MetricDefinition::count(
        "teamcity_unauthorized_agents_count",
        "TeamCity Unauthorized Agents Count",
        "/app/rest/agents?locator=authorized:false",
    ),
    MetricDefinition::count(
        "teamcity_disconnected_agents_count",
        "TeamCity Disconnected Agents Count",
        "/app/rest/agents?locator=connected:false",
    ),
    MetricDefinition::count(
        "teamcity_investigations_count",
        "TeamCity Investigations Count",
        "/app/rest/investigations",
    ),
    MetricDefinition::count(
        "teamcity_running_builds",
        "TeamCity Running Builds",
        "/app/rest/builds?locator=running:true",
    ),
    MetricDefinition::count(
        "teamcity_hanging_builds",
        "TeamCity Hanging Builds",
        "/app/rest/builds?locator=state:running,hanging:true",
    ),
];

/// Ordered, immutable collection of [`MetricDefinition`]s.
///
/// Iteration order is the definition order; a scrape pass queries TeamCity in this order.
#[derive(Debug, Clone, Copy)]
pub struct MetricCatalog {
    definitions: &'static [MetricDefinition],
}

impl Default for MetricCatalog {
    fn default() -> Self {
        Self::teamcity()
    }
}

impl MetricCatalog {
    /// Catalog of all metrics supported by the exporter.
    pub const fn teamcity() -> Self {
        Self {
            definitions: TEAMCITY_METRICS,
        }
    }

    /// Creates a catalog from the provided definitions.
    ///
    /// # Panics
    ///
    /// Panics if metric names are not unique, or if a definition uses the [`SCRAPE_ERROR_METRIC`] name.
    pub fn new(definitions: &'static [MetricDefinition]) -> Self {
        for (i, definition) in definitions.iter().enumerate() {
            assert_ne!(
                definition.name, SCRAPE_ERROR_METRIC,
                "`{SCRAPE_ERROR_METRIC}` is reserved for the scrape error gauge"
            );
            let is_duplicate = definitions[..i]
                .iter()
                .any(|prev| prev.name == definition.name);
            assert!(
                !is_duplicate,
                "Metric `{}` is defined in the catalog multiple times",
                definition.name
            );
        }
        Self { definitions }
    }

    /// Iterates over definitions in this catalog.
    pub fn iter(&self) -> slice::Iter<'static, MetricDefinition> {
        self.definitions.iter()
    }

    /// Returns the number of definitions in this catalog.
    pub const fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Checks whether this catalog is empty.
    pub const fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Looks up a definition by the metric name.
    pub fn get(&self, name: &str) -> Option<&'static MetricDefinition> {
        self.definitions
            .iter()
            .find(|definition| definition.name == name)
    }
}

impl IntoIterator for MetricCatalog {
    type Item = &'static MetricDefinition;
    type IntoIter = slice::Iter<'static, MetricDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.definitions.iter()
    }
}
