//! CLI command definitions and handlers.

use clap::{Parser, Subcommand};

use fontorrent_core::prefs::JsonPreferences;
use fontorrent_core::trackers::{SchemePolicy, TrackerStore};

pub mod config;
pub mod trackers;

/// Load configuration with graceful fallback to defaults.
///
/// If the config file doesn't exist or can't be parsed, defaults are used.
pub fn load_config() -> fontorrent_core::Config {
    fontorrent_core::Config::load().unwrap_or_else(|e| {
        tracing::warn!("Using default configuration: {}", e);
        fontorrent_core::Config::default()
    })
}

/// Open the tracker store configured for this user.
pub fn open_tracker_store() -> TrackerStore<JsonPreferences> {
    let config = load_config();
    let prefs = JsonPreferences::from_config(&config);
    tracing::debug!("Using preferences at {}", prefs.path().display());
    TrackerStore::load(prefs, SchemePolicy::from_config(&config.trackers))
}

/// Fontorrent - WebTorrent session coordinator
#[derive(Parser)]
#[command(name = "fontorrent")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Manage discovery trackers
    Trackers(TrackersArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the trackers command
#[derive(Parser)]
pub struct TrackersArgs {
    /// Trackers subcommand
    #[command(subcommand)]
    pub action: TrackersAction,
}

/// Trackers subcommands
#[derive(Subcommand)]
pub enum TrackersAction {
    /// Show the configured trackers
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Replace the tracker list
    Set {
        /// Tracker URLs (wss:// or ws://)
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Append trackers to the list
    Add {
        /// Tracker URLs (wss:// or ws://)
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Restore the built-in trackers
    Reset,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show all configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Reset to defaults
    Reset,
}
