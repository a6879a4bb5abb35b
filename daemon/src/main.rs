use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mcpd::cli::{Cli, Commands, DaemonCommands};
use mcpd::handlers;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon { command } => match command {
            DaemonCommands::Start {
                port,
                background,
                startup_timeout,
            } => handlers::daemon::start(port, background, startup_timeout).await?,
            DaemonCommands::Stop => handlers::daemon::stop(&cli.daemon_url).await?,
            DaemonCommands::Status => handlers::daemon::status(&cli.daemon_url).await?,
            DaemonCommands::Logs { lines } => handlers::daemon::logs(lines).await?,
        },
        Commands::Run(args) => handlers::run::run(&cli.daemon_url, args).await?,
        Commands::Servers => handlers::servers::list(&cli.daemon_url).await?,
        Commands::Tools { id } => handlers::servers::tools(&cli.daemon_url, &id).await?,
        Commands::Call { id, tool, args } => {
            handlers::servers::call(&cli.daemon_url, &id, &tool, &args).await?
        }
        Commands::Stop { id } => handlers::servers::stop(&cli.daemon_url, &id).await?,
        Commands::StopAll => handlers::servers::stop_all(&cli.daemon_url).await?,
        Commands::Health => handlers::servers::health(&cli.daemon_url).await?,
    }

    Ok(())
}
