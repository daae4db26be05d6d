//! Command-line interface definitions using clap derive API.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;

/// Message relay server CLI
#[derive(Parser)]
#[command(name = "relay-server")]
#[command(about = "An in-memory chat message relay with an HTTP JSON API")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Bind address, overriding the configured host and port
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
}
