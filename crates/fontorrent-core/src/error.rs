//! Error types for Fontorrent.
//!
//! This module provides the crate-wide error type plus the narrower error
//! kinds surfaced by session admission, folder export and the engine and
//! storage capability traits.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for Fontorrent operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Fontorrent.
#[derive(Error, Debug)]
pub enum Error {
    /// Session admission failed
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// Folder export could not run
    #[error(transparent)]
    Export(#[from] ExportError),

    /// Engine collaborator reported a failure
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A tracker list contained no usable endpoint
    #[error("no valid tracker endpoints (accepted schemes: {0})")]
    NoValidTrackers(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Preference store error
    #[error("preference store error: {0}")]
    PreferencesError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Reasons a descriptor could not become a session.
///
/// Admission failures are reported to the caller and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// The descriptor is malformed (bad URI, empty payload, bad identifier)
    #[error("malformed descriptor: {0}")]
    Malformed(String),

    /// The engine refused the descriptor
    #[error("engine rejected descriptor: {0}")]
    Rejected(String),
}

impl From<EngineError> for AdmissionError {
    fn from(err: EngineError) -> Self {
        Self::Rejected(err.to_string())
    }
}

/// Reasons a folder export could not start or never obtained a file list.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// No session could be resolved (the registry is empty)
    #[error("no session available to export")]
    NotFound,

    /// The host has no directory storage capability
    #[error("host has no directory storage capability")]
    Unsupported,

    /// The user declined the directory grant
    #[error("directory selection cancelled")]
    Cancelled,

    /// The session never produced a file list
    #[error("no files available after waiting {0} seconds for metadata")]
    NoFiles(u64),

    /// The granted directory could not be opened
    #[error("storage error: {0}")]
    Storage(String),
}

/// Terminal status of an export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    /// Every file was attempted
    Completed,
    /// The job started but never obtained a file list
    Aborted,
    /// The job could not start
    FailedToStart,
}

impl ExportError {
    /// The terminal status a job ending with this error reports.
    #[must_use]
    pub const fn status(&self) -> ExportStatus {
        match self {
            Self::NoFiles(_) => ExportStatus::Aborted,
            Self::NotFound | Self::Unsupported | Self::Cancelled | Self::Storage(_) => {
                ExportStatus::FailedToStart
            }
        }
    }
}

/// Failures reported by the engine collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine refused the request
    #[error("{0}")]
    Rejected(String),

    /// The engine does not offer this capability
    #[error("capability not supported: {0}")]
    Unsupported(&'static str),

    /// The request failed
    #[error("engine failure: {0}")]
    Failed(String),
}

/// Failures retrieving a file's content from the engine.
#[derive(Error, Debug)]
pub enum ContentError {
    /// Whole-content retrieval is not offered for this file
    #[error("whole-content retrieval unavailable")]
    Unavailable,

    /// The content could not be read
    #[error("content read failed: {0}")]
    Read(#[from] io::Error),
}

/// Failures obtaining a directory from the storage host.
#[derive(Error, Debug)]
pub enum GrantError {
    /// The host cannot provide directories
    #[error("directory storage not supported")]
    Unsupported,

    /// The user cancelled the grant
    #[error("directory grant cancelled")]
    Cancelled,

    /// The granted directory could not be opened
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<GrantError> for ExportError {
    fn from(err: GrantError) -> Self {
        match err {
            GrantError::Unsupported => Self::Unsupported,
            GrantError::Cancelled => Self::Cancelled,
            GrantError::Io(e) => Self::Storage(e.to_string()),
        }
    }
}
