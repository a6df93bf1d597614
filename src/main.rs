//! CLI for gamefeed
//!
//! Subcommands:
//! - `ingestor`: publish a game event to the queue on a fixed interval
//! - `processor`: consume game events from the queue and acknowledge them
//!
//! Both read their settings from the environment (and an optional `.env`
//! file) and stop cleanly on SIGINT or SIGTERM.

use std::process::ExitCode;

use clap::Parser;
use gamefeed::config::load_config;
use gamefeed::service::{self, INGESTOR_SERVICE, PROCESSOR_SERVICE, shutdown};
use gamefeed::utils::logging::{self, Level};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Clone, Copy)]
#[command(name = "gamefeed", version)]
enum Command {
    /// Publish placeholder game events every INGESTOR_INTERVAL seconds
    Ingestor,
    /// Consume game events and log the processing result
    Processor,
}

impl Command {
    fn service_name(&self) -> &'static str {
        match self {
            Command::Ingestor => INGESTOR_SERVICE,
            Command::Processor => PROCESSOR_SERVICE,
        }
    }

    fn display_name(&self) -> &'static str {
        match self {
            Command::Ingestor => "Ingestor",
            Command::Processor => "Processor",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cmd = Command::parse();
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init(cmd.service_name(), Level::Info);
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    logging::init(cmd.service_name(), settings.log_level());
    info!("{} service starting up", cmd.display_name());

    let token = CancellationToken::new();
    let listener = shutdown::spawn_signal_listener(token.clone());

    let result = match cmd {
        Command::Ingestor => service::run_ingestor(&settings, token.clone()).await,
        Command::Processor => service::run_processor(&settings, token.clone()).await,
    };

    token.cancel();
    let _ = listener.await;

    match result {
        Ok(()) => {
            info!("{} service shutdown complete", cmd.display_name());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "{} service failed", cmd.display_name());
            ExitCode::FAILURE
        }
    }
}
