//! CTI Graph Setup Entry Point
//!
//! Synchronizes the index mappings, stores the core data and, when a feed is
//! configured, loads it as one commit authored by the system identity.

use cti_graph::ingest::{build_commit, IngestContext, ProcessorRegistry};
use cti_graph::{Dependencies, IntelClient, SetupError};
use dotenv::dotenv;
use std::env;
use std::fs;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging.
fn init_tracing() -> Result<(), SetupError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cti_graph=info,cti_graph_repository=info"));

    let json = env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .init();

        info!(
            service_name = "cti-graph",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with JSON format"
        );
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true).pretty())
            .init();

        info!(
            service_name = "cti-graph",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with console output"
        );
    }

    Ok(())
}

/// Load `FEED_PATH` with the `FEED_PROCESSOR` processor, if both are set.
async fn load_feed(client: &IntelClient) -> Result<(), SetupError> {
    let (Ok(path), Ok(processor)) = (env::var("FEED_PATH"), env::var("FEED_PROCESSOR")) else {
        return Ok(());
    };
    let raw = fs::read_to_string(&path)
        .map_err(|e| SetupError::config(format!("Failed to read {}: {}", path, e)))?;

    let author = client.system().identity().clone();
    let mut ctx = IngestContext::new(author.clone(), Vec::new());
    let entities = ProcessorRegistry::builtin().process(&processor, raw.lines(), &mut ctx)?;
    if entities.is_empty() {
        warn!(feed = %path, "Feed produced no entities");
        return Ok(());
    }

    let commit = build_commit(&ctx, entities);
    let outcomes = client.store_commit(&author, &commit, true).await?;
    info!(feed = %path, processor = %processor, stored = outcomes.len(), "Feed loaded");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), SetupError> {
    // Load environment variables from .env file
    dotenv().ok();

    init_tracing()?;

    info!("Starting CTI graph setup");

    let deps = match Dependencies::new().await {
        Ok(deps) => {
            info!("Dependencies initialized successfully");
            deps
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize dependencies");
            return Err(e);
        }
    };

    let report = deps.client.setup(&deps.schemas).await?;
    for (entity_type, e) in report.failures() {
        error!(entity_type = %entity_type.as_str(), error = %e, "Index left unsynchronized");
    }

    if let Err(e) = load_feed(&deps.client).await {
        error!(error = %e, "Feed load failed");
        return Err(e);
    }

    info!(types = report.outcomes.len(), "CTI graph setup completed");
    Ok(())
}
