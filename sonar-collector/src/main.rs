use clap::{Args, Parser};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::{StatsdBuilder, StatsdError};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;
use webhook::RunError;
use webhook::metrics_defs::{ALL_METRICS, MetricType};

mod config;

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Parser)]
#[command(version, about = "Stores SonarQube analysis measures delivered by webhook")]
enum CliCommand {
    /// Start the webhook listener
    Run(ConfigArgs),
    /// Load and validate the config file, then exit
    Validate(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    config_file: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not set up statsd exporter: {0}")]
    Metrics(#[from] StatsdError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Run(#[from] RunError),
}

fn main() {
    let cli = CliCommand::parse();

    let result = match cli {
        CliCommand::Run(args) => run(args),
        CliCommand::Validate(args) => Config::from_file(&args.config_file)
            .map(|_| println!("{} is valid", args.config_file.display()))
            .map_err(CliError::from),
    };

    if let Err(e) = result {
        eprintln!("sonar-collector: {e}");
        process::exit(1);
    }
}

fn run(args: ConfigArgs) -> Result<(), CliError> {
    let config = Config::from_file(&args.config_file)?;

    let _sentry = init_logging(config.common.logging.as_ref());
    if let Some(metrics) = &config.common.metrics {
        init_metrics(metrics)?;
    }

    tracing::info!(config_file = %args.config_file.display(), "Starting sonar-collector");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(webhook::run(config.collector)).map_err(|e| {
        tracing::error!(error = &e as &dyn std::error::Error, "sonar-collector stopped");
        e
    })?;
    Ok(())
}

/// The returned guard flushes pending Sentry events when dropped.
fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let level = logging
        .and_then(|l| l.level.as_deref())
        .unwrap_or(DEFAULT_LOG_LEVEL);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let guard = logging.and_then(|l| l.sentry_dsn.as_deref()).map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some(config.prefix.as_str()))?;

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("A metrics recorder is already installed, keeping it");
    }

    for def in ALL_METRICS {
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(def.name, def.description),
            MetricType::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }

    Ok(())
}
