use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use forcebridge::app::{AppOutcome, Application, ForwarderSettings};
use forcebridge::{config, logging};

const EXIT_CONFIGURATION_ERROR: i32 = 1;
const EXIT_RUNTIME_ERROR: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

/// Salesforce Streaming API to RabbitMQ bridge.
///
/// Listens for event messages on the Streaming API channels of one or more
/// Salesforce orgs and forwards them to the configured RabbitMQ brokers.
/// Message sources, sinks and routing rules are defined in CONFIG_FILE,
/// either in JSON (.json) or YAML (.yaml, .yml) format.
#[derive(Debug, Parser)]
#[command(name = "forcebridge", version)]
struct Cli {
    /// Path to the configuration file
    config_file: PathBuf,

    /// Ignore errors that occur on reading or writing replay marker values
    #[arg(long)]
    ignore_replay_storage_errors: bool,

    /// Ignore errors that occur when a message cannot be forwarded to its
    /// message sink
    #[arg(long)]
    ignore_sink_errors: bool,

    /// On connection failures, retry to reach the Streaming API for the
    /// given number of seconds before giving up (0 retries indefinitely)
    #[arg(long, default_value_t = 10)]
    source_connection_timeout: u64,

    /// Logging detail level (1-3)
    #[arg(short = 'v', long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=3))]
    verbosity: u8,

    /// Show the full error representation on failure
    #[arg(short = 't', long)]
    show_trace: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbosity);
    info!("starting up");

    let config = match config::load_config(&cli.config_file) {
        Ok(config) => config,
        Err(e) => {
            report_error(&e, cli.show_trace);
            std::process::exit(EXIT_CONFIGURATION_ERROR);
        }
    };
    info!(path = %cli.config_file.display(), "configuration loaded");

    let settings = ForwarderSettings {
        ignore_replay_storage_errors: cli.ignore_replay_storage_errors,
        ignore_sink_errors: cli.ignore_sink_errors,
        source_connection_timeout: Duration::from_secs(cli.source_connection_timeout),
    };

    match Application::new(config, settings).run().await {
        Ok(AppOutcome::Clean) => info!("shut down cleanly"),
        Ok(AppOutcome::Interrupted) => std::process::exit(EXIT_INTERRUPTED),
        Ok(AppOutcome::Fatal) => std::process::exit(EXIT_RUNTIME_ERROR),
        Err(e) => {
            report_error(&e, cli.show_trace);
            std::process::exit(EXIT_CONFIGURATION_ERROR);
        }
    }
}

fn report_error(error: &forcebridge_common::BridgeError, show_trace: bool) {
    if show_trace {
        error!("{error:?}");
    } else {
        error!("{error}");
    }
}
