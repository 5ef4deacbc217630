//! `MetricsExporter` and closely related types.

use std::{
    convert::Infallible,
    fmt,
    future::{self, Future},
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    time::Instant,
};

use hyper::{
    body::Incoming, header, server::conn::http1, service::service_fn, Method, Request, Response,
    StatusCode,
};
use hyper_util::rt::TokioIo;
use prometheus_client::{collector::Collector, registry::Registry};
use tokio::{io, net::TcpListener, sync::watch};

use crate::format::Format;


#[derive(Clone)]
struct MetricsExporterInner {
    registry: Arc<Registry>,
    format: Format,
}

impl MetricsExporterInner {
    async fn render_body(&self) -> Result<String, fmt::Error> {
        let started_at = Instant::now();
        let registry = Arc::clone(&self.registry);
        let format = self.format;
        // Encoding runs collectors, which perform blocking requests to TeamCity.
        let buffer = tokio::task::spawn_blocking(move || format.encode(&registry))
            .await
            .unwrap()?; // propagate panics should they occur in the spawned blocking task

        let latency = started_at.elapsed();
        let scraped_size = buffer.len();
        tracing::debug!(
            latency_sec = latency.as_secs_f64(),
            scraped_size,
            "Scraped metrics in {latency:?} (scraped size: {scraped_size}B)"
        );
        Ok(buffer)
    }

    async fn render(&self, method: &Method) -> Response<String> {
        if method != Method::GET && method != Method::HEAD {
            return Response::builder()
                .status(StatusCode::METHOD_NOT_ALLOWED)
                .header(header::ALLOW, "GET, HEAD")
                .body(String::new())
                .unwrap();
        }

        match self.render_body().await {
            Ok(body) => Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, self.format.content_type())
                .body(body)
                .unwrap(),
            Err(err) => {
                tracing::error!(%err, "Failed encoding metrics");
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body("Failed encoding metrics".to_owned())
                    .unwrap()
            }
        }
    }
}

/// Metrics exporter to Prometheus.
///
/// An exporter serves metrics from a [`Registry`] provided on creation; collectors are injected
/// into the registry explicitly (e.g., using [`Self::from_collectors()`]) rather than via
/// a global registry.
pub struct MetricsExporter<'a> {
    inner: MetricsExporterInner,
    shutdown_future: Pin<Box<dyn Future<Output = ()> + Send + 'a>>,
}

impl fmt::Debug for MetricsExporter<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MetricsExporter")
            .field("registry", &self.inner.registry)
            .field("format", &self.inner.format)
            .finish_non_exhaustive()
    }
}

impl<'a> MetricsExporter<'a> {
    /// Creates an exporter based on the provided metrics [`Registry`]. Note that the registry
    /// is in `Arc`, meaning it can be used elsewhere (e.g., to export data in another format).
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            inner: MetricsExporterInner {
                registry,
                format: Format::default(),
            },
            shutdown_future: Box::pin(future::pending()),
        }
    }

    /// Creates an exporter with a fresh registry containing the provided collectors.
    pub fn from_collectors<I>(collectors: I) -> Self
    where
        I: IntoIterator<Item = Box<dyn Collector>>,
    {
        let mut registry = Registry::default();
        let mut collector_count = 0_usize;
        for collector in collectors {
            registry.register_collector(collector);
            collector_count += 1;
        }
        tracing::info!("Created metrics exporter with {collector_count} collector(s)");
        Self::new(Arc::new(registry))
    }

    /// Sets the export [`Format`]. By default, [`Format::Prometheus`] is used.
    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.inner.format = format;
        self
    }

    /// Configures graceful shutdown for the exporter server.
    #[must_use]
    pub fn with_graceful_shutdown<F>(mut self, shutdown: F) -> Self
    where
        F: Future<Output = ()> + Send + 'a,
    {
        self.shutdown_future = Box::pin(shutdown);
        self
    }

    /// Starts the server on the specified address. This future resolves when the server is shut down.
    ///
    /// The server will expose the following endpoints:
    ///
    /// - `GET` / `HEAD` on any path: serves the metrics in the format configured using [`Self::with_format()`]
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn start(self, bind_address: SocketAddr) -> io::Result<()> {
        self.bind(bind_address).await?.start().await
    }

    /// Creates an HTTP exporter server and binds it to the specified address.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn bind(mut self, bind_address: SocketAddr) -> io::Result<MetricsServer<'a>> {
        let listener = TcpListener::bind(bind_address).await?;
        let local_addr = listener.local_addr()?;
        let server = async move {
            let (started_shutdown_sender, started_shutdown) = watch::channel(());
            loop {
                let (stream, peer_addr) = tokio::select! {
                    res = listener.accept() => res?,
                    () = &mut self.shutdown_future => break,
                };
                tracing::trace!(%peer_addr, "Accepted scrape connection");

                let io = TokioIo::new(stream);
                let inner = self.inner.clone();
                let mut started_shutdown = started_shutdown.clone();
                tokio::spawn(async move {
                    let service = service_fn(|req: Request<Incoming>| {
                        let inner = inner.clone();
                        async move { Ok::<_, Infallible>(inner.render(req.method()).await) }
                    });
                    let conn = http1::Builder::new().serve_connection(io, service);
                    tokio::pin!(conn);

                    let res = tokio::select! {
                        _ = started_shutdown.changed() => {
                            conn.as_mut().graceful_shutdown();
                            conn.await
                        }
                        res = conn.as_mut() => res,
                    };
                    if let Err(err) = res {
                        tracing::warn!(%err, %peer_addr, "Error serving connection");
                    }
                });
            }

            tracing::info!("Stop signal received, metrics exporter is shutting down");
            // Send the graceful shutdown signal to all alive connections.
            drop(started_shutdown);
            started_shutdown_sender.send_replace(());
            // Wait until all connections are dropped.
            started_shutdown_sender.closed().await;

            Ok(())
        };

        Ok(MetricsServer {
            server: Box::pin(server),
            local_addr,
        })
    }
}

/// Metrics server bound to a certain local address returned by [`MetricsExporter::bind()`].
///
/// Useful e.g. if you need to find out which port the server was bound to if the 0th port was specified.
#[must_use = "Server should be `start()`ed"]
pub struct MetricsServer<'a> {
    server: Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>,
    local_addr: SocketAddr,
}

impl fmt::Debug for MetricsServer<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MetricsServer")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl MetricsServer<'_> {
    /// Returns the local address this server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts this server. Resolves once the server is shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting connections fails.
    pub async fn start(self) -> io::Result<()> {
        tracing::info!("Started metrics exporter on {}", self.local_addr);
        self.server.await?;
        tracing::info!("Metrics exporter server shut down");
        Ok(())
    }
}
