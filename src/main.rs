mod addon;
mod cli;
mod config;
mod error;
mod gameinfo;
mod install;
mod logging;
mod maps;
mod markers;
mod mount;
mod parser;
mod reconcile;
mod report;
mod resources;
mod tasks;
mod vpk;
mod workshop;
mod writer;

use anyhow::Result;

fn main() -> Result<()> {
    let config = config::AppConfig::load_or_create()?;
    let data_dir = config::base_data_dir()?;
    if let Err(err) = logging::init(&config.log_level, &data_dir) {
        eprintln!("Logging disabled: {err:#}");
    }
    cli::run(config)
}
