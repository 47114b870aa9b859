use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use walt_config::Config;
use walt_consumer::Consumer;
use walt_producer::Producer;
use walt_runtime::Runner;
use walt_storage::{PostgresSink, ResultSink};

#[derive(Parser)]
#[command(name = "walt", version, about = "Website availability monitor", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Raise the default log level to INFO.
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Probe the configured URLs and publish results to Kafka.
    Produce,
    /// Consume published results from Kafka and persist them to Postgres.
    Consume,
    /// Create the configured database and its tables.
    SetupDatabase,
    /// Drop the configured database's tables, then the database itself.
    TeardownDatabase,
    /// Print the default configuration as TOML.
    GenerateConfigSample,
    /// Print the default configuration as TOML with environment overrides applied.
    GenerateConfigSampleFromEnv,
}

impl Action {
    fn requires_config(&self) -> bool {
        !matches!(self, Action::GenerateConfigSample | Action::GenerateConfigSampleFromEnv)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.action.requires_config() && cli.config.is_none() {
        init_tracing(&Config::default().log_level, cli.verbose);
        tracing::error!("Cannot proceed with no config file");
        return ExitCode::FAILURE;
    }

    let loaded = walt_config::load(cli.config.as_deref());
    let cfg = walt_config::override_from_env(&loaded.config);
    init_tracing(&cfg.log_level, cli.verbose);
    tracing::info!("config_hash={}", loaded.config_hash);

    match run(cli.action, cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(action: Action, cfg: Config) -> Result<()> {
    match action {
        Action::SetupDatabase => walt_storage::setup_database(&cfg.postgres).await,
        Action::TeardownDatabase => walt_storage::teardown_database(&cfg.postgres).await,
        Action::Produce => {
            let runner = Runner::new("Producer");
            runner.run(Producer::new(&cfg)).await;
            Ok(())
        }
        Action::Consume => {
            let sink: Arc<dyn ResultSink> = Arc::new(PostgresSink::new(cfg.postgres.clone()));
            let consumer = Consumer::new(sink, Duration::from_secs(cfg.interval), Duration::from_secs(cfg.timeout), cfg.kafka.clone());
            let runner = Runner::new("Consumer");
            runner.run(consumer).await;
            Ok(())
        }
        Action::GenerateConfigSample => {
            println!("{}", walt_config::to_toml_string(&Config::default()));
            Ok(())
        }
        Action::GenerateConfigSampleFromEnv => {
            println!("{}", walt_config::to_toml_string(&cfg));
            Ok(())
        }
    }
}

/// `verbose` always wins when set; otherwise the configured `log_level`
/// drives the default, with `RUST_LOG` taking precedence over both.
fn init_tracing(log_level: &str, verbose: bool) {
    let default_level = if verbose { "info".to_string() } else { log_level.to_ascii_lowercase() };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .init();
}
