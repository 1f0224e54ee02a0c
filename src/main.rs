use std::env::consts::{ARCH, FAMILY, OS};

use anyhow::Error;
use tracing::trace;

use board_profile::config::init_config;
use board_profile::logger::init_logger;

use crate::program::Program;

mod program;

const CONFIG_DIR: &str = "./config";

/// Logs important information about the system being used.
/// This is used for debugging purposes in case of unexpected behavior.
fn log_system_information() {
    trace!("Printing system information out into log for debug purposes...");
    trace!("ARCH:           \"{}\"", ARCH);
    trace!("FAMILY:         \"{}\"", FAMILY);
    trace!("OS:             \"{}\"", OS);
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config_manager = init_config(CONFIG_DIR).await?;
    let config = config_manager.get_app_config();
    let logger = init_logger(&config)?;
    log_system_information();

    let program = Program::new(config, logger);
    program.run().await
}
