//! Kubernetes metrics harvester.
//!
//! Scrapes Prometheus endpoints in the cluster on a fixed interval, translates their metrics into tagged series, and
//! submits them to the broker.

#![deny(warnings)]
#![deny(missing_docs)]

use std::sync::Arc;

use clap::Parser as _;
use harvest_app::prelude::*;
use harvest_components::{
    common::writer::{EncoderConfiguration, MetricWriter},
    destinations::submission::{SubmissionConfiguration, Submitter},
    sources::prometheus::{scrape_client_builder, CollectorConfiguration},
    transforms::metric_filter::MetricFilterConfiguration,
};
use harvest_config::ConfigurationLoader;
use harvest_core::{state::NodeConditionCache, stats::SharedStats};
use harvest_error::{ErrorContext as _, GenericError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod config;
use self::config::Cli;

mod orchestrator;
use self::orchestrator::Orchestrator;

/// Prefix of the environment variables that override configuration file values.
const ENV_PREFIX: &str = "HARVEST";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = initialize_logging(None) {
        fatal_and_exit(format!("failed to initialize logging: {}", e));
    }

    if let Err(e) = initialize_tls() {
        fatal_and_exit(format!("failed to initialize TLS: {}", e));
    }

    match run(cli).await {
        Ok(()) => info!("Harvester stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<(), GenericError> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        process_id = std::process::id(),
        "Harvester starting..."
    );

    let config = ConfigurationLoader::default()
        .try_from_yaml(&cli.config)
        .from_environment(ENV_PREFIX)
        .error_context("Failed to load environment configuration.")?
        .into_generic();

    let encoder_config =
        EncoderConfiguration::from_configuration(&config).error_context("Failed to load encoder configuration.")?;
    let filter_config = MetricFilterConfiguration::from_configuration(&config)
        .error_context("Failed to load metric filter configuration.")?;
    let submission_config = SubmissionConfiguration::from_configuration(&config)
        .error_context("Failed to load submission configuration.")?;
    let collector_config =
        CollectorConfiguration::from_configuration(&config).error_context("Failed to load collector configuration.")?;

    let filter = filter_config.build().error_context("Failed to build metric filter.")?;
    info!(rules = filter.len(), "Loaded metric filter.");

    let stats = SharedStats::new();
    let writer = MetricWriter::new(encoder_config.encoder(), filter, stats.clone())
        .with_default_stream_tags(encoder_config.default_stream_tags())
        .with_filter_dynamic(filter_config.filter_dynamic);
    let submitter = Arc::new(
        Submitter::new(submission_config, stats.clone()).error_context("Failed to create submitter.")?,
    );

    let scrape_client = scrape_client_builder()
        .build()
        .error_context("Failed to build scrape client.")?;
    let collectors = collector_config
        .build_collectors(&scrape_client, &writer, &submitter)
        .error_context("Failed to create collectors.")?;
    if collectors.is_empty() {
        warn!("No endpoints configured. Nothing will be collected.");
    }

    let orchestrator = Orchestrator::new(
        collectors,
        stats,
        NodeConditionCache::new(),
        collector_config.collection_interval(),
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal. Stopping..."),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal. Stopping..."),
        }
        shutdown.cancel();
    });

    if cli.once {
        orchestrator.run_cycle(&cancel).await;
    } else {
        orchestrator.run(cancel).await;
    }

    Ok(())
}
