mod commands;
mod handlers;
mod logging;
mod progress;
mod runner;

use std::process;

use clap::{CommandFactory, Parser};
use commands::Cli;
use dotenv::dotenv;
use runner::{ContainerRunner, NativeRunner, Runner};
use tracing::error;

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match bids_curate_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    let command = match args.command {
        Some(command) => command,
        None => {
            let _ = Cli::command().print_long_help();
            return;
        }
    };

    let runner: Box<dyn Runner> = match &args.container {
        Some(image) => Box::new(ContainerRunner::detect(image)),
        None => Box::new(NativeRunner::new(config)),
    };

    match runner.run(&command) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(err) => {
            error!("Error: {:#}", err);
            process::exit(1);
        }
    }
}
