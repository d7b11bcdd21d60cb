use anyhow::Result;
use clap::{Parser, Subcommand};
use taskgate_core::{
    config::{Config, ServiceKind},
    server, telemetry,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "taskgate", version, about = "Taskgate gateway and backend services")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Edge gateway relaying to the user and task services
    Gateway,
    /// Task service
    Tasks,
    /// User service
    Users,
}

impl From<Command> for ServiceKind {
    fn from(command: Command) -> Self {
        match command {
            Command::Gateway => ServiceKind::Gateway,
            Command::Tasks => ServiceKind::Tasks,
            Command::Users => ServiceKind::Users,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env(cli.command.into())?;

    let metrics = telemetry::init(&config.telemetry)?;

    info!("Starting Taskgate {}", config.service.name());
    info!("HTTP server listening on {}", config.http_addr());

    server::run(config, metrics).await
}
