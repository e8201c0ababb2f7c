//! pkgedit worker binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use pkgedit_core::config::AppConfig;
use pkgedit_metadata::MetadataStore;
use pkgedit_storage::ObjectStore;
use pkgedit_worker::PipelineCoordinator;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Apply queued metadata edits to published package archives
#[derive(Parser, Debug)]
#[command(name = "pkgedit-worker")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "PKGEDIT_CONFIG",
        default_value = "config/worker.toml"
    )]
    config: String,

    /// Exit non-zero when any individual edit fails to back up or apply
    #[arg(long, env = "PKGEDIT_FAIL_ON_EDIT_ERRORS")]
    fail_on_edit_errors: bool,
}

fn load_config(path: &str) -> Result<AppConfig> {
    let config_path = std::path::Path::new(path);
    let mut figment = Figment::new();

    if config_path.exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}, using defaults and environment", path);
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("PKGEDIT_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("pkgedit-worker v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    let storage = pkgedit_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend connectivity verified");

    let metadata = pkgedit_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    metadata
        .health_check()
        .await
        .context("metadata health check failed")?;
    tracing::info!("Metadata store initialized");

    let coordinator = PipelineCoordinator::new(storage, metadata, &config.pipeline);
    let report = coordinator
        .run()
        .await
        .context("failed to fetch eligible edit requests")?;

    match serde_json::to_string(&report) {
        Ok(json) => tracing::info!(report = %json, "Run report"),
        Err(e) => tracing::warn!(error = %e, "Failed to serialize run report"),
    }

    if args.fail_on_edit_errors && report.has_failures() {
        anyhow::bail!(
            "{} edit(s) failed during backup and {} during application",
            report.backup_failures,
            report.apply_failures
        );
    }

    Ok(())
}
