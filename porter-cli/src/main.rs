use anyhow::Result;
use clap::Parser;
use env_logger::Env;

use porter::cli::{self, Cli};
use porter::config::Config;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load(cli.global.config.as_deref())?;

    env_logger::Builder::from_env(Env::default().default_filter_or(config.log.level.as_str()))
        .format_timestamp(None)
        .init();
    log::debug!("Using store {}", config.store.path.display());

    cli::run(cli, config)
}
