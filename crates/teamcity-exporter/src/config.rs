//! Exporter configuration read from the environment and command-line args.

use clap::Parser;
use teamcity_metrics::{Credentials, UpstreamTarget};
use tracing::level_filters::LevelFilter;

use std::{
    convert::Infallible,
    io,
    net::{SocketAddr, ToSocketAddrs},
    time::Duration,
};

use crate::format::Format;

/// Error converting [`ExporterArgs`] into [`ExporterConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required parameter is not specified.
    #[error("{env_var} env not defined")]
    Missing {
        /// Name of the environment variable for the parameter.
        env_var: &'static str,
    },
    /// The request timeout is zero.
    #[error("request timeout must be positive")]
    ZeroTimeout,
    /// The listen address cannot be resolved.
    #[error("cannot resolve listen address `{address}`")]
    ListenAddress {
        /// Address as specified in the configuration.
        address: String,
        /// Resolution error.
        #[source]
        err: io::Error,
    },
}

/// Raw exporter arguments. Each argument can be provided as a command-line flag
/// or an environment variable.
#[derive(Debug, Parser)]
#[command(version, about = "Prometheus exporter for TeamCity server metrics")]
pub struct ExporterArgs {
    /// Login for the TeamCity REST API.
    #[arg(long, env = "TE_API_LOGIN", hide_env_values = true)]
    pub api_login: Option<String>,
    /// Password for the TeamCity REST API.
    #[arg(long, env = "TE_API_PASSWORD", hide_env_values = true)]
    pub api_password: Option<String>,
    /// Base URL of the TeamCity server, e.g. `https://teamcity.example.com`.
    #[arg(long, env = "TE_API_URL")]
    pub api_url: Option<String>,
    /// IP address or hostname to serve metrics on.
    #[arg(long, env = "TE_LISTEN_ADDRESS", default_value = "0.0.0.0")]
    pub listen_address: String,
    /// Port to serve metrics on.
    #[arg(long, env = "TE_LISTEN_PORT", default_value_t = 9190)]
    pub listen_port: u16,
    /// Maximum logging level (`ERROR`, `WARN`, `INFO`, `DEBUG` or `TRACE`). Unknown levels
    /// fall back to `ERROR`.
    #[arg(
        long,
        env = "TE_LOG_LEVEL",
        default_value_t = LevelFilter::ERROR,
        value_parser = parse_log_level
    )]
    pub log_level: LevelFilter,
    /// Timeout for a single TeamCity API request, in seconds.
    #[arg(long, env = "TE_REQUEST_TIMEOUT", default_value_t = 10)]
    pub request_timeout: u64,
    /// Exposition format for the served metrics.
    #[arg(long, env = "TE_EXPOSITION_FORMAT", value_enum, default_value_t = Format::Prometheus)]
    pub exposition_format: Format,
}

/// Parses a logging level leniently. Besides `tracing` level names, accepts `WARNING`
/// and `CRITICAL`; unrecognized values map to `ERROR`.
fn parse_log_level(raw: &str) -> Result<LevelFilter, Infallible> {
    let level = match raw.trim().to_ascii_uppercase().as_str() {
        "WARNING" => LevelFilter::WARN,
        "CRITICAL" | "FATAL" => LevelFilter::ERROR,
        other => other.parse().unwrap_or(LevelFilter::ERROR),
    };
    Ok(level)
}

/// Resolves the listen address, which may be a hostname. The first resolved address is used.
fn resolve_listen_address(address: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    let to_error = |err| ConfigError::ListenAddress {
        address: address.to_owned(),
        err,
    };
    (address, port)
        .to_socket_addrs()
        .map_err(to_error)?
        .next()
        .ok_or_else(|| to_error(io::Error::from(io::ErrorKind::AddrNotAvailable)))
}

/// Validated exporter configuration.
#[derive(Debug)]
pub struct ExporterConfig {
    /// Credentials for the TeamCity REST API.
    pub credentials: Credentials,
    /// TeamCity server.
    pub target: UpstreamTarget,
    /// Address to serve metrics on.
    pub bind_address: SocketAddr,
    /// Timeout for a single TeamCity API request.
    pub request_timeout: Duration,
    /// Exposition format for the served metrics.
    pub format: Format,
}

impl TryFrom<ExporterArgs> for ExporterConfig {
    type Error = ConfigError;

    fn try_from(args: ExporterArgs) -> Result<Self, Self::Error> {
        let login = args.api_login.ok_or(ConfigError::Missing {
            env_var: "TE_API_LOGIN",
        })?;
        let password = args.api_password.ok_or(ConfigError::Missing {
            env_var: "TE_API_PASSWORD",
        })?;
        let api_url = args.api_url.ok_or(ConfigError::Missing {
            env_var: "TE_API_URL",
        })?;
        if args.request_timeout == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        let bind_address = resolve_listen_address(&args.listen_address, args.listen_port)?;

        Ok(Self {
            credentials: Credentials::new(login, password),
            target: UpstreamTarget::new(&api_url),
            bind_address,
            request_timeout: Duration::from_secs(args.request_timeout),
            format: args.exposition_format,
        })
    }
}
