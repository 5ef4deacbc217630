//! Access to the TeamCity REST API.

use std::{error, fmt, time::Duration};

use reqwest::{blocking::Client, header, StatusCode};

/// Credentials used to authenticate with the TeamCity REST API.
///
/// The `Debug` implementation omits both the login and the password.
#[derive(Clone)]
pub struct Credentials {
    login: String,
    password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Creates credentials from a login / password pair.
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }

    /// Returns the login.
    pub fn login(&self) -> &str {
        &self.login
    }
}

/// Base URL of a TeamCity server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    base_url: String,
}

impl UpstreamTarget {
    /// Creates a target from the server URL, e.g. `https://teamcity.example.com/`.
    /// Trailing slashes are removed.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Returns the normalized base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the full URL for the specified API path (incl. query).
    pub fn url(&self, query_path: &str) -> String {
        format!("{}{query_path}", self.base_url)
    }
}

/// Error requesting data from TeamCity.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The request could not be completed (connection refused, timeout etc.).
    #[error("request failed: {0}")]
    Transport(#[source] Box<dyn error::Error + Send + Sync>),
    /// TeamCity responded with a non-successful HTTP status.
    #[error("unexpected HTTP status {status}, response: {body}")]
    Status {
        /// Response status.
        status: StatusCode,
        /// Response body, which usually explains the error.
        body: String,
    },
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}

/// Synchronous source of TeamCity API responses.
///
/// Implementations must not retry failed requests.
pub trait Upstream: fmt::Debug + Send + Sync + 'static {
    /// Performs a `GET` request to the specified URL and returns the response body.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response status is not successful.
    fn get(&self, url: &str) -> Result<String, FetchError>;
}

/// [`Upstream`] implementation using blocking HTTP requests with basic authentication.
#[derive(Debug)]
pub struct HttpUpstream {
    client: Client,
    credentials: Credentials,
}

impl HttpUpstream {
    /// Default timeout for a single request.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates an HTTP upstream with the specified per-request `timeout`.
    ///
    /// Must not be called from an async context.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(credentials: Credentials, timeout: Duration) -> reqwest::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            credentials,
        })
    }
}

impl Upstream for HttpUpstream {
    fn get(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .basic_auth(&self.credentials.login, Some(&self.credentials.password))
            .send()?;
        let status = response.status();
        let body = response.text()?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(FetchError::Status { status, body })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizing_base_url() {
        let target = UpstreamTarget::new("https://teamcity.example.com//");
        assert_eq!(target.base_url(), "https://teamcity.example.com");
        assert_eq!(
            target.url("/app/rest/buildQueue"),
            "https://teamcity.example.com/app/rest/buildQueue"
        );

        let target = UpstreamTarget::new("http://localhost:8111");
        assert_eq!(
            target.url("/app/rest/agents?locator=enabled:false"),
            "http://localhost:8111/app/rest/agents?locator=enabled:false"
        );
    }

    #[test]
    fn credentials_debug_omits_secrets() {
        let credentials = Credentials::new("exporter", "hunter2");
        let debug = format!("{credentials:?}");
        assert_eq!(debug, "Credentials { .. }");

        let upstream = HttpUpstream::new(credentials, HttpUpstream::DEFAULT_TIMEOUT).unwrap();
        let debug = format!("{upstream:?}");
        assert!(!debug.contains("exporter"), "{debug}");
        assert!(!debug.contains("hunter2"), "{debug}");
    }
}
