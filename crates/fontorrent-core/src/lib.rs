//! # Fontorrent Core Library
//!
//! `fontorrent-core` coordinates concurrent peer-to-peer transfer sessions
//! driven by an external transfer engine and exposes a periodically
//! refreshed, consistent view of them to a presentation layer.
//!
//! ## Features
//!
//! - **Session registry**: one record per content fingerprint, kept in sync
//!   with the engine through event listeners
//! - **Snapshots**: session and peer snapshots, refreshed on engine events and
//!   on a fixed interval
//! - **Tracker configuration**: validated, persisted discovery endpoints that
//!   propagate to live sessions
//! - **Folder export**: writes a session's files into a granted directory with
//!   per-file failure isolation and aggregate progress
//!
//! ## Modules
//!
//! - [`config`] - Configuration management
//! - [`coordinator`] - Facade used by the presentation layer
//! - [`engine`] - Capability traits the transfer engine must satisfy
//! - [`export`] - Folder export pipeline and storage capability
//! - [`prefs`] - Key/value preference persistence
//! - [`registry`] - Session registry
//! - [`scheduler`] - Snapshot scheduler
//! - [`session`] - Session, file and peer snapshot types
//! - [`trackers`] - Tracker configuration store
//!
//! ## Example
//!
//! ```rust,ignore
//! use fontorrent_core::{Coordinator, Config, Descriptor};
//! use fontorrent_core::prefs::JsonPreferences;
//!
//! let config = Config::load()?;
//! let prefs = JsonPreferences::from_config(&config);
//! let coordinator = Coordinator::start(engine, prefs, config).await;
//! let session = coordinator.admit_session(&Descriptor::parse("magnet:?xt=urn:btih:...")?).await?;
//! let mut sessions = coordinator.subscribe_sessions();
//! sessions.changed().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod export;
pub mod prefs;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod trackers;

pub use config::Config;
pub use coordinator::Coordinator;
pub use engine::{Descriptor, Fingerprint};
pub use error::{AdmissionError, Error, ExportError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Interval between forced snapshot refreshes (2 seconds)
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 2_000;

/// Interval between metadata checks while an export waits for files
pub const DEFAULT_METADATA_POLL_MS: u64 = 500;

/// Ceiling for the metadata wait of an export
pub const DEFAULT_METADATA_TIMEOUT_SECS: u64 = 30;

/// Preference key the tracker list is persisted under
pub const TRACKERS_STORAGE_KEY: &str = "fontorrent.trackers";
