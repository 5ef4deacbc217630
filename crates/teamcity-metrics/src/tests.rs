//! Tests for scrape passes using a mock upstream.

use assert_matches::assert_matches;
use prometheus_client::{encoding::text, registry::Registry};
use reqwest::StatusCode;
use tracing::subscriber::{DefaultGuard, Subscriber};
use tracing_capture::{CaptureLayer, SharedStorage};
use tracing_subscriber::layer::SubscriberExt;

use std::{collections::HashMap, io, sync::Mutex, thread};

use crate::*;

const BASE_URL: &str = "http://teamcity.test";

#[derive(Debug, Clone)]
enum MockResponse {
    Body(&'static str),
    Refused,
    Status(StatusCode),
}

#[derive(Debug, Default)]
struct MockUpstream {
    responses: HashMap<&'static str, MockResponse>,
    requests: Mutex<Vec<String>>,
}

impl MockUpstream {
    /// Creates an upstream returning `{"count": i}` for the `i`th catalog entry.
    fn healthy() -> Self {
        let responses = MetricCatalog::teamcity()
            .iter()
            .zip(COUNT_BODIES)
            .map(|(definition, body)| (definition.query_path, MockResponse::Body(body)))
            .collect();
        Self {
            responses,
            requests: Mutex::default(),
        }
    }

    fn with_response(mut self, query_path: &'static str, response: MockResponse) -> Self {
        self.responses.insert(query_path, response);
        self
    }

    fn requested_paths(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

const COUNT_BODIES: [&str; 8] = [
    r#"{"count": 5, "href": "/app/rest/buildQueue"}"#,
    r#"{"count": 1}"#,
    r#"{"count": 2}"#,
    r#"{"count": 3}"#,
    r#"{"count": 4}"#,
    r#"{"count": 6, "investigation": []}"#,
    r#"{"count": 7}"#,
    r#"{"count": 0}"#,
];

impl Upstream for MockUpstream {
    fn get(&self, url: &str) -> Result<String, FetchError> {
        let path = url.strip_prefix(BASE_URL).expect("unexpected base URL");
        self.requests.lock().unwrap().push(path.to_owned());
        match self.responses.get(path) {
            Some(MockResponse::Body(body)) => Ok((*body).to_owned()),
            Some(MockResponse::Status(status)) => Err(FetchError::Status {
                status: *status,
                body: "Authentication required".to_owned(),
            }),
            Some(MockResponse::Refused) | None => Err(FetchError::Transport(Box::new(
                io::Error::from(io::ErrorKind::ConnectionRefused),
            ))),
        }
    }
}

fn collector(upstream: MockUpstream) -> TeamcityCollector<MockUpstream> {
    TeamcityCollector::new(UpstreamTarget::new(&format!("{BASE_URL}/")), upstream)
}

fn tracing_subscriber(storage: &SharedStorage) -> impl Subscriber {
    tracing_subscriber::fmt()
        .pretty()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .finish()
        .with(CaptureLayer::new(storage))
}

fn capture_logs(storage: &SharedStorage) -> DefaultGuard {
    tracing::subscriber::set_default(tracing_subscriber(storage))
}

fn error_events(storage: &tracing_capture::Storage) -> Vec<tracing_capture::CapturedEvent<'_>> {
    storage
        .all_events()
        .filter(|event| *event.metadata().level() == tracing::Level::ERROR)
        .collect()
}

fn expected_samples() -> Vec<Sample> {
    let values = [5.0, 1.0, 2.0, 3.0, 4.0, 6.0, 7.0, 0.0];
    MetricCatalog::teamcity()
        .iter()
        .zip(values)
        .map(|(definition, value)| Sample::new(definition.name, definition.description, value))
        .chain([Sample::new(SCRAPE_ERROR_METRIC, SCRAPE_ERROR_DESCRIPTION, 0.0)])
        .collect()
}

#[test]
fn scraping_healthy_upstream() {
    let collector = collector(MockUpstream::healthy());
    let samples: Vec<_> = collector.collect().collect();

    assert_eq!(samples, expected_samples());
    assert_eq!(samples[0].name, "teamcity_build_queue_length");
    assert_eq!(samples[0].value, 5.0);

    let expected_paths: Vec<_> = MetricCatalog::teamcity()
        .iter()
        .map(|definition| definition.query_path.to_owned())
        .collect();
    assert_eq!(collector.upstream().requested_paths(), expected_paths);
}

#[test]
fn scrape_pass_is_lazy() {
    let collector = collector(MockUpstream::healthy());
    let mut pass = collector.collect();
    assert!(collector.upstream().requested_paths().is_empty());

    let sample = pass.next().unwrap();
    assert_eq!(sample.name, "teamcity_build_queue_length");
    assert_eq!(collector.upstream().requested_paths(), ["/app/rest/buildQueue"]);

    assert_eq!(pass.by_ref().count(), 8);
    assert!(pass.next().is_none());
    assert!(pass.next().is_none());
    assert_eq!(collector.upstream().requested_paths().len(), 8);
}

#[test]
fn unreachable_upstream_short_circuits_pass() {
    let storage = SharedStorage::default();
    let _guard = capture_logs(&storage);

    let upstream =
        MockUpstream::healthy().with_response("/app/rest/buildQueue", MockResponse::Refused);
    let collector = collector(upstream);
    let mut pass = collector.collect();
    let samples: Vec<_> = pass.by_ref().collect();

    assert_eq!(
        samples,
        [Sample::new(SCRAPE_ERROR_METRIC, SCRAPE_ERROR_DESCRIPTION, 1.0)]
    );
    assert!(!pass.outcome().upstream_reachable);
    assert_eq!(collector.upstream().requested_paths(), ["/app/rest/buildQueue"]);

    let storage = storage.lock();
    let errors = error_events(&storage);
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0]["url"].as_debug_str().unwrap(),
        "http://teamcity.test/app/rest/buildQueue"
    );
}

#[test]
fn error_status_for_first_request_is_unreachable_upstream() {
    let storage = SharedStorage::default();
    let _guard = capture_logs(&storage);

    let upstream = MockUpstream::healthy().with_response(
        "/app/rest/buildQueue",
        MockResponse::Status(StatusCode::UNAUTHORIZED),
    );
    let samples: Vec<_> = collector(upstream).collect().collect();

    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].name, SCRAPE_ERROR_METRIC);
    assert_eq!(samples[0].value, 1.0);

    let storage = storage.lock();
    let errors = error_events(&storage);
    assert_eq!(errors.len(), 1);
    let err = errors[0]["err"].as_debug_str().unwrap();
    assert!(err.contains("401"), "{err}");
    assert!(err.contains("Authentication required"), "{err}");
}

#[test]
fn invalid_json_is_soft_failure() {
    let storage = SharedStorage::default();
    let _guard = capture_logs(&storage);

    let upstream = MockUpstream::healthy()
        .with_response("/app/rest/agents", MockResponse::Body("<html>Oops</html>"));
    let collector = collector(upstream);
    let samples: Vec<_> = collector.collect().collect();

    let expected: Vec<_> = expected_samples()
        .into_iter()
        .filter(|sample| sample.name != "teamcity_agents_count")
        .collect();
    assert_eq!(samples.len(), 8);
    assert_eq!(samples, expected);
    assert_eq!(samples.last().unwrap().value, 0.0);
    assert_eq!(collector.upstream().requested_paths().len(), 8);

    let storage = storage.lock();
    let errors = error_events(&storage);
    assert_eq!(errors.len(), 1);
    let error = &errors[0];
    assert!(error
        .message()
        .unwrap()
        .contains("Error parsing JSON response"));
    assert_eq!(
        error["url"].as_debug_str().unwrap(),
        "http://teamcity.test/app/rest/agents"
    );
}

#[test]
fn missing_value_key_is_soft_failure() {
    let storage = SharedStorage::default();
    let _guard = capture_logs(&storage);

    let upstream = MockUpstream::healthy().with_response(
        "/app/rest/investigations",
        MockResponse::Body(r#"{"investigation": []}"#),
    );
    let samples: Vec<_> = collector(upstream).collect().collect();

    assert_eq!(samples.len(), 8);
    assert!(samples
        .iter()
        .all(|sample| sample.name != "teamcity_investigations_count"));
    assert_eq!(samples.last().unwrap().value, 0.0);

    let storage = storage.lock();
    let errors = error_events(&storage);
    assert_eq!(errors.len(), 1);
    let error = &errors[0];
    assert!(error.message().unwrap().contains("Error parsing metric value"));
    assert_eq!(
        error["response"].as_debug_str().unwrap(),
        r#"{"investigation": []}"#
    );
    assert_eq!(error["key"].as_str().unwrap(), "count");
}

#[test]
fn non_numeric_value_is_soft_failure() {
    let upstream = MockUpstream::healthy().with_response(
        "/app/rest/builds?locator=running:true",
        MockResponse::Body(r#"{"count": "seven"}"#),
    );
    let samples: Vec<_> = collector(upstream).collect().collect();

    assert_eq!(samples.len(), 8);
    assert!(samples
        .iter()
        .all(|sample| sample.name != "teamcity_running_builds"));
}

#[test]
fn later_request_failure_is_soft_failure() {
    let upstream = MockUpstream::healthy()
        .with_response(
            "/app/rest/agents?locator=enabled:false",
            MockResponse::Refused,
        )
        .with_response(
            "/app/rest/investigations",
            MockResponse::Status(StatusCode::INTERNAL_SERVER_ERROR),
        );
    let collector = collector(upstream);
    let mut pass = collector.collect();
    let samples: Vec<_> = pass.by_ref().collect();

    assert!(pass.outcome().upstream_reachable);
    let names: Vec<_> = samples.iter().map(|sample| sample.name).collect();
    assert_eq!(
        names,
        [
            "teamcity_build_queue_length",
            "teamcity_agents_count",
            "teamcity_unauthorized_agents_count",
            "teamcity_disconnected_agents_count",
            "teamcity_running_builds",
            "teamcity_hanging_builds",
            SCRAPE_ERROR_METRIC,
        ]
    );
    assert_eq!(samples.last().unwrap().value, 0.0);
    assert_eq!(collector.upstream().requested_paths().len(), 8);
}

#[test]
fn single_scrape_error_sample_if_all_entries_fail() {
    let mut upstream = MockUpstream::healthy();
    for response in upstream.responses.values_mut() {
        *response = MockResponse::Body("not JSON");
    }
    let samples: Vec<_> = collector(upstream).collect().collect();

    assert_eq!(
        samples,
        [Sample::new(SCRAPE_ERROR_METRIC, SCRAPE_ERROR_DESCRIPTION, 0.0)]
    );
}

#[test]
fn consecutive_passes_are_identical() {
    let upstream = MockUpstream::healthy()
        .with_response("/app/rest/agents", MockResponse::Body("{"));
    let collector = collector(upstream);

    let first_pass: Vec<_> = collector.collect().collect();
    let second_pass: Vec<_> = collector.collect().collect();
    assert_eq!(first_pass, second_pass);
    assert_eq!(first_pass.len(), 8);
}

#[test]
fn concurrent_passes_are_independent() {
    let collector = collector(MockUpstream::healthy());
    let passes: Vec<Vec<_>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| collector.collect().collect::<Vec<_>>()))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    for samples in passes {
        assert_eq!(samples, expected_samples());
    }
    assert_eq!(collector.upstream().requested_paths().len(), 32);
}

#[test]
fn custom_catalog() {
    static CATALOG: &[MetricDefinition] = &[MetricDefinition {
        name: "teamcity_projects_count",
        description: "TeamCity Projects Count",
        query_path: "/app/rest/projects",
        value_key: "count",
    }];

    let upstream = MockUpstream::default()
        .with_response("/app/rest/projects", MockResponse::Body(r#"{"count": 12}"#));
    let collector = collector(upstream).with_catalog(MetricCatalog::new(CATALOG));
    let samples: Vec<_> = collector.collect().collect();

    assert_eq!(
        samples,
        [
            Sample::new("teamcity_projects_count", "TeamCity Projects Count", 12.0),
            Sample::new(SCRAPE_ERROR_METRIC, SCRAPE_ERROR_DESCRIPTION, 0.0),
        ]
    );
}

#[test]
fn encoding_collector_in_registry() {
    let upstream = MockUpstream::healthy()
        .with_response("/app/rest/agents", MockResponse::Body("[]"));
    let mut registry = Registry::default();
    registry.register_collector(Box::new(collector(upstream)));

    let mut buffer = String::new();
    text::encode(&mut buffer, &registry).unwrap();
    let lines: Vec<_> = buffer.lines().collect();

    let expected_lines = [
        "# TYPE teamcity_build_queue_length gauge",
        "teamcity_build_queue_length 5.0",
        "# TYPE teamcity_hanging_builds gauge",
        "teamcity_hanging_builds 0.0",
        "# TYPE teamcity_scrape_error gauge",
        "teamcity_scrape_error 0.0",
    ];
    for line in expected_lines {
        assert!(lines.contains(&line), "{lines:#?}");
    }
    assert!(
        lines
            .iter()
            .all(|line| !line.starts_with("teamcity_agents_count")),
        "{lines:#?}"
    );
    assert_eq!(*lines.last().unwrap(), "# EOF");
}

#[test]
fn extracting_values() {
    assert_eq!(extract_value(r#"{"count": 3}"#, "count").unwrap(), 3.0);
    assert_eq!(extract_value(r#"{"count": 2.5}"#, "count").unwrap(), 2.5);
    assert_eq!(
        extract_value(r#"{"count": 18446744073709551615}"#, "count").unwrap(),
        u64::MAX as f64
    );

    assert_matches!(
        extract_value("{\"count\": ", "count").unwrap_err(),
        ExtractError::Json(_)
    );
    assert_matches!(
        extract_value("[1, 2]", "count").unwrap_err(),
        ExtractError::MissingKey { key: "count" }
    );
    assert_matches!(
        extract_value(r#"{"count": null}"#, "count").unwrap_err(),
        ExtractError::NotNumeric { key: "count", value } if value.is_null()
    );
}
