//! DBAT server entry point.

use clap::Parser;

use dbat::cli::{handle_error, Cli, Commands};
use dbat::infrastructure::config::ConfigLoader;
use dbat::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli.command, cli.config.as_deref(), cli.json).await {
        handle_error(err, cli.json);
    }
}

async fn run(command: Commands, config_path: Option<&std::path::Path>, json: bool) -> anyhow::Result<()> {
    let config = ConfigLoader::load(config_path)?;
    let _logger = LoggerImpl::init(&config.logging)?;

    match command {
        Commands::Serve(args) => dbat::cli::commands::serve::execute(args, config).await,
        Commands::Event(args) => dbat::cli::commands::event::execute(args, &config, json).await,
    }
}
