//! synthrun CLI - trigger remote synthetic tests from CI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use synthrun::backend::HttpBackend;
use synthrun::ci;
use synthrun::config::load_config;
use synthrun::report::{ConsoleReporter, JUnitReporter, MultiReporter};
use synthrun::runner::Runner;

#[derive(Parser)]
#[command(name = "synthrun")]
#[command(about = "Trigger remote synthetic tests and wait for their results", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "synthrun.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger tests and wait for their results
    Run {
        /// Public ids to trigger, in addition to any suite files
        #[arg(short = 'p', long = "public-id")]
        public_ids: Vec<String>,

        /// Suite file pattern(s), overriding the configured ones
        #[arg(short, long)]
        files: Vec<String>,

        /// JUnit XML output path
        #[arg(long)]
        junit: Option<PathBuf>,

        /// Fail the run when the backend degrades mid-poll
        #[arg(long)]
        fail_on_critical_errors: bool,

        /// Report timed-out results without failing the run
        #[arg(long)]
        no_fail_on_timeout: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            public_ids,
            files,
            junit,
            fail_on_critical_errors,
            no_fail_on_timeout,
        } => {
            let config = load_config(&cli.config)?;
            if let Some(trigger_app) = &config.synthrun.trigger_app {
                ci::set_trigger_app(trigger_app);
            }

            let mut options = config.run_options();
            options.public_ids.extend(public_ids);
            if !files.is_empty() {
                options.files = files;
            }
            if fail_on_critical_errors {
                options.fail_on_critical_errors = true;
            }
            if no_fail_on_timeout {
                options.fail_on_timeout = false;
            }

            let client = HttpBackend::new(
                &config.backend.base_url,
                &config.backend.api_key,
                &config.backend.app_key,
            );

            let mut reporter =
                MultiReporter::new().with_reporter(ConsoleReporter::new(cli.verbose));
            if let Some(path) = junit.or_else(|| config.report.junit.clone()) {
                reporter = reporter.with_reporter(JUnitReporter::new(path));
            }

            let outcome = Runner::new(options, client, reporter).run().await?;
            std::process::exit(outcome.summary.exit_code());
        }
    }
}
