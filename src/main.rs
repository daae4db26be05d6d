//! Main entry point for the message relay server.

use anyhow::Result;
use clap::Parser;
use message_relay::{cli, server, settings::Settings, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let mut settings = Settings::load()?;
    telemetry::init(&settings.logging)?;

    match args.command {
        cli::Commands::Serve { addr } => {
            if let Some(addr) = addr {
                settings.server.host = addr.ip().to_string();
                settings.server.port = addr.port();
            }
            server::serve(settings).await
        }
    }
}
