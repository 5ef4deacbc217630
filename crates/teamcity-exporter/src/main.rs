//! TeamCity metrics exporter binary.

use clap::Parser;
use prometheus_client::collector::Collector;
use teamcity_exporter::{ExporterArgs, ExporterConfig, MetricsExporter};
use teamcity_metrics::{HttpUpstream, TeamcityCollector};
use tokio::sync::watch;
use tracing::level_filters::LevelFilter;

use std::{io, process::ExitCode};

fn init_tracing(max_level: LevelFilter) {
    tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = match ExporterArgs::try_parse() {
        Ok(args) => args,
        Err(err) => {
            err.print().ok();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS // `--help` or `--version`
            };
        }
    };
    init_tracing(args.log_level);

    tracing::debug!("Getting API credentials and TeamCity URL");
    let config = match ExporterConfig::try_from(args) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, "Invalid exporter configuration");
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(?config, "Loaded exporter configuration");

    // The blocking HTTP client must be created outside the Tokio runtime.
    let upstream = match HttpUpstream::new(config.credentials.clone(), config.request_timeout) {
        Ok(upstream) => upstream,
        Err(err) => {
            tracing::error!(%err, "Failed initializing HTTP client for TeamCity");
            return ExitCode::FAILURE;
        }
    };
    let collector = TeamcityCollector::new(config.target.clone(), upstream);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(%err, "Failed starting Tokio runtime");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(serve(config, collector))
}

async fn serve(config: ExporterConfig, collector: TeamcityCollector<HttpUpstream>) -> ExitCode {
    let (stop_sender, mut stop_receiver) = watch::channel(());
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        stop_sender.send_replace(());
    });

    tracing::info!(
        teamcity_url = collector.target().base_url(),
        metric_count = collector.catalog().len(),
        "Collecting TeamCity metrics"
    );
    let exporter = MetricsExporter::from_collectors([Box::new(collector) as Box<dyn Collector>])
        .with_format(config.format)
        .with_graceful_shutdown(async move {
            stop_receiver.changed().await.ok();
        });

    let bind_address = config.bind_address;
    let server = match exporter.bind(bind_address).await {
        Ok(server) => server,
        Err(err) => {
            tracing::error!(%err, %bind_address, "An error occurred while starting HTTP listener");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = server.start().await {
        tracing::error!(%err, "Metrics exporter server failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
