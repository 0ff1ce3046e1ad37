use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};

use st_cli::commands::probe;
use st_cli::{Cli, Commands, Config, host};
use st_client::HttpMonitor;

fn monitor(config: &Config) -> Result<HttpMonitor> {
    HttpMonitor::new(&config.server_url, config.request_timeout())
        .context("failed to create monitor client")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    st_cli::init_tracing(cli.verbose);

    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    match &cli.command {
        Some(Commands::Run) => host::run_stdio(&config).await?,
        Some(Commands::Ping) => {
            let api = monitor(&config)?;
            probe::ping(&mut std::io::stdout(), &api).await?;
        }
        Some(Commands::Whoami) => {
            let api = monitor(&config)?;
            probe::whoami(&mut std::io::stdout(), &api).await?;
        }
        None => {
            Cli::command().print_help()?;
        }
    }

    Ok(())
}
