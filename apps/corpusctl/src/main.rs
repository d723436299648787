mod cli;
mod command;
mod config;
mod error;

use error::WrapErr;

use clap::CommandFactory;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    // RUST_LOG still wins when set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> error::Result<()> {
    color_eyre::install()?;
    let command_line = cli::Cli::parse();
    init_tracing(command_line.verbose);

    let cfg = config::Config::load(command_line.config.as_deref()).context("Load configuration error")?;
    tracing::debug!("[Main] catalog {:?}, cache {:?}", cfg.catalog_dir, cfg.cache_dir);

    if let Some(command) = command_line.command {
        let cmd: Box<dyn command::Command> = match command {
            cli::Commands::Catalog { corpora, languages } => {
                Box::new(command::CatalogCommand::new(cfg, corpora, languages))
            }
            cli::Commands::Runs { filter, limit } => Box::new(command::RunsCommand::new(cfg, filter, limit)),
            cli::Commands::Show { job, json } => Box::new(command::ShowCommand::new(cfg, job, json)),
            cli::Commands::ClearRuns => Box::new(command::ClearRunsCommand::new(cfg)),
            cli::Commands::Config => Box::new(command::ConfigCommand::new(cfg)),
        };
        cmd.execute().await?;
    } else {
        cli::Cli::command().print_help()?;
    }

    Ok(())
}
