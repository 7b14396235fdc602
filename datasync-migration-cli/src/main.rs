use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use datasync_migration_core::{MigrationConfig, MigrationService, RunContext, RunReport};
use log::{debug, warn};

mod output;

/// Exit code when at least one migration did not succeed. Distinct from the
/// usage error code clap exits with.
const EXIT_PARTIAL_FAILURE: u8 = 3;

#[derive(Parser)]
#[command(name = "datasync-migration")]
#[command(about = "Set up AWS DataSync for cross-account S3 bucket migrations", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the IAM role, bucket policies, DataSync locations and tasks
    Setup {
        /// Path to the YAML migration configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Report every change without making it
        #[arg(long)]
        dry_run: bool,
    },

    /// Check a configuration file without contacting AWS
    Validate {
        /// Path to the YAML migration configuration
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn load_config(path: &Path) -> Result<MigrationConfig> {
    MigrationConfig::load(path)
        .with_context(|| format!("Invalid configuration file {}", path.display()))
}

fn exit_code(report: &RunReport) -> u8 {
    if report.all_succeeded() {
        0
    } else {
        EXIT_PARTIAL_FAILURE
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Validate { config } => {
            let loaded = load_config(&config)?;
            output::print_validated(&loaded);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Setup { config, dry_run } => {
            let loaded = load_config(&config)?;
            let context = RunContext::new(dry_run, cli.verbose);
            debug!("Starting run {}", context.run_id);

            let service = MigrationService::new(loaded, context).await;
            let report = tokio::select! {
                report = service.run() => report.context("Migration setup could not start")?,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted; resources created so far were not rolled back");
                    anyhow::bail!("Cancelled by user");
                }
            };
            output::print_report(&report, service.config());
            Ok(ExitCode::from(exit_code(&report)))
        }
    }
}
