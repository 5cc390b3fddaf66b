//! tailpipe entry point: parses the CLI, installs the logger, and runs
//! the pipeline. Exit code 0 on graceful termination, 1 on any fatal
//! startup error.

use std::process;
use tracing::error;

use tailpipe_agent::{agent, config::Config, logger};

#[tokio::main]
async fn main() {
    let config = match Config::parse() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("tailpipe: {err}");
            process::exit(1);
        }
    };

    logger::init(config.debug);

    if let Err(err) = agent::run(config).await {
        error!(error = %err, "fatal startup error");
        process::exit(1);
    }
}
