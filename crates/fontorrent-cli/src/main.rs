//! Fontorrent CLI - tracker and configuration management
//!
//! Fontorrent coordinates WebTorrent sessions for a presentation layer. The
//! command line manages what those sessions share: the tracker list and the
//! coordinator configuration.
//!
//! ## Quick Start
//!
//! ```bash
//! # Show the configured trackers
//! fontorrent trackers list
//!
//! # Replace them
//! fontorrent trackers set wss://tracker.openwebtorrent.com wss://tracker.example
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

use anyhow::Result;
use clap::Parser;

mod commands;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Trackers(args) => commands::trackers::run(args).await,
        Command::Config(args) => commands::config::run(args).await,
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,fontorrent=info,fontorrent_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
