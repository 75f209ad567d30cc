mod cli;
mod run;
mod utils;

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use vedirect_core::version::build_version;

use crate::cli::Cli;
use crate::utils::print_error;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let cli = Cli::parse();

    if cli.version {
        println!("{}", version_string());
        return ExitCode::SUCCESS;
    }

    // Set up logging
    setup_logging(&cli);

    match run::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

fn version_string() -> String {
    build_version(
        env!("CARGO_PKG_VERSION"),
        option_env!("VEDIRECT_MQTT_COMMIT").unwrap_or(""),
        option_env!("VEDIRECT_MQTT_BUILD_DATE").unwrap_or(""),
    )
}

fn setup_logging(cli: &Cli) {
    let filter_level = if cli.debug { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_level));

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
