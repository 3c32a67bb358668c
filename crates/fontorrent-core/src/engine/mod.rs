//! Capability interface of the transfer engine collaborator.
//!
//! The engine owns peer discovery, the wire protocol and piece selection.
//! Fontorrent only needs the narrow surface below:
//!
//! - [`Engine`] turns a [`Descriptor`] into a live session handle
//! - [`SessionHandle`] exposes a session's metadata, statistics, peers,
//!   announce list and event stream
//! - [`ContentFile`] gives access to one file's content
//!
//! A capability the engine lacks is reported once through a typed error
//! ([`EngineError::Unsupported`], [`ContentError::Unavailable`]).

use std::fmt;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{AdmissionError, ContentError, EngineError};

/// Stable identifier of a session's content (the info hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an engine-supplied identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison (hex info hashes vary in case).
    #[must_use]
    pub fn eq_ignore_case(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// What a session is admitted from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    /// A bare info hash (40 hex or 32 base32 characters)
    InfoHash(String),
    /// A magnet URI carrying a `urn:btih:` topic
    Magnet(String),
    /// Raw `.torrent` descriptor bytes
    Torrent(Vec<u8>),
    /// Local files to create (seed) a new session from
    Bundle(Vec<PathBuf>),
}

impl Descriptor {
    /// Parse a textual descriptor: a magnet URI or a bare info hash.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Malformed`] if the text is neither.
    pub fn parse(input: &str) -> Result<Self, AdmissionError> {
        let input = input.trim();
        let descriptor = if has_magnet_prefix(input) {
            Self::Magnet(input.to_string())
        } else {
            Self::InfoHash(input.to_string())
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Check the descriptor is well-formed before it reaches the engine.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Malformed`] describing the first problem found.
    pub fn validate(&self) -> Result<(), AdmissionError> {
        match self {
            Self::InfoHash(hash) => {
                if is_info_hash(hash) {
                    Ok(())
                } else {
                    Err(AdmissionError::Malformed(format!(
                        "'{hash}' is not an info hash"
                    )))
                }
            }
            Self::Magnet(uri) => validate_magnet(uri),
            Self::Torrent(bytes) => {
                if bytes.is_empty() {
                    Err(AdmissionError::Malformed("empty torrent descriptor".into()))
                } else {
                    Ok(())
                }
            }
            Self::Bundle(paths) => {
                if paths.is_empty() {
                    Err(AdmissionError::Malformed("empty file bundle".into()))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Short description for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::InfoHash(hash) => format!("info hash {hash}"),
            Self::Magnet(uri) => {
                let shown: String = uri.chars().take(50).collect();
                format!("magnet {shown}...")
            }
            Self::Torrent(bytes) => format!("torrent descriptor ({} bytes)", bytes.len()),
            Self::Bundle(paths) => format!("bundle of {} file(s)", paths.len()),
        }
    }
}

fn has_magnet_prefix(input: &str) -> bool {
    input
        .get(..8)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("magnet:?"))
}

fn is_info_hash(value: &str) -> bool {
    match value.len() {
        40 => value.chars().all(|c| c.is_ascii_hexdigit()),
        32 => value
            .chars()
            .all(|c| c.is_ascii_alphabetic() || ('2'..='7').contains(&c)),
        _ => false,
    }
}

fn validate_magnet(uri: &str) -> Result<(), AdmissionError> {
    if !has_magnet_prefix(uri) {
        return Err(AdmissionError::Malformed(
            "magnet URI must start with 'magnet:?'".into(),
        ));
    }

    let query = &uri[8..];
    let topic = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| key.eq_ignore_ascii_case("xt"))
        .map(|(_, value)| value)
        .ok_or_else(|| AdmissionError::Malformed("magnet URI has no 'xt' topic".into()))?;

    let hash = topic
        .get(..9)
        .filter(|scheme| scheme.eq_ignore_ascii_case("urn:btih:"))
        .map(|_| &topic[9..])
        .ok_or_else(|| {
            AdmissionError::Malformed(format!("unsupported magnet topic '{topic}'"))
        })?;

    if is_info_hash(hash) {
        Ok(())
    } else {
        Err(AdmissionError::Malformed(format!(
            "magnet topic carries an invalid info hash '{hash}'"
        )))
    }
}

/// Transport a peer connection runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Plain TCP
    Tcp,
    /// uTP over UDP
    Utp,
    /// WebRTC data channel
    WebRtc,
    /// HTTP web seed
    WebSeed,
}

/// One peer connection as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Wire {
    /// Peer identifier, when the engine knows it
    pub peer_id: Option<String>,
    /// Remote network address, absent for WebRTC peers
    pub remote_address: Option<String>,
    /// Transport, when the engine reports it
    pub transport: Option<Transport>,
}

/// Transfer statistics of one session as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferStats {
    /// Bytes downloaded
    pub downloaded: u64,
    /// Bytes uploaded
    pub uploaded: u64,
    /// Download rate in bytes per second
    pub download_speed: u64,
    /// Upload rate in bytes per second
    pub upload_speed: u64,
    /// Connected peers
    pub num_peers: usize,
    /// Estimated time remaining
    pub time_remaining: Option<Duration>,
    /// Completion fraction (0.0 - 1.0)
    pub progress: f64,
    /// Metadata resolved and storage ready
    pub ready: bool,
    /// All pieces downloaded
    pub done: bool,
}

/// Lifecycle and transfer events pushed by the engine for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Metadata (name, files) resolved
    Metadata,
    /// Session ready to transfer
    Ready,
    /// Bytes received
    Download(u64),
    /// Bytes sent
    Upload(u64),
    /// Download complete, session keeps seeding
    Done,
    /// A peer connected
    Wire {
        /// Peer identifier, if known
        peer_id: Option<String>,
        /// Remote address, if any
        remote_address: Option<String>,
    },
    /// No peers found for the session
    NoPeers,
    /// Connected to a tracker
    Tracker(String),
    /// Non-fatal warning
    Warning(String),
    /// Session error
    Error(String),
}

/// Chunked content of one file.
pub type ContentStream = BoxStream<'static, io::Result<Vec<u8>>>;

/// A file inside a session.
pub trait ContentFile: Send + Sync + 'static {
    /// Path relative to the session root, `/` separated.
    fn path(&self) -> String;

    /// Size in bytes.
    fn length(&self) -> u64;

    /// Bytes downloaded.
    fn downloaded(&self) -> u64;

    /// Completion fraction (0.0 - 1.0).
    fn progress(&self) -> f64;

    /// Retrieve the whole content in one block.
    ///
    /// Returns [`ContentError::Unavailable`] when the engine only offers
    /// streaming for this file.
    fn read_all(&self) -> impl Future<Output = Result<Vec<u8>, ContentError>> + Send;

    /// Open a chunked stream of the content.
    fn stream(&self) -> Result<ContentStream, ContentError>;
}

/// A live session inside the engine.
pub trait SessionHandle: Send + Sync + 'static {
    /// File type of this engine.
    type File: ContentFile;

    /// Content fingerprint.
    fn fingerprint(&self) -> Fingerprint;

    /// Display name, once metadata is known.
    fn name(&self) -> Option<String>;

    /// Total size in bytes (0 until metadata is known).
    fn length(&self) -> u64;

    /// Magnet URI for sharing the session.
    fn magnet_uri(&self) -> Option<String>;

    /// Current transfer statistics.
    fn stats(&self) -> TransferStats;

    /// Files in listed order (empty until metadata is known).
    fn files(&self) -> Vec<Self::File>;

    /// Open peer connections.
    fn wires(&self) -> Vec<Wire>;

    /// Discovery endpoints the session announces to.
    fn announce(&self) -> Vec<String>;

    /// Replace the discovery endpoints.
    fn set_announce(&self, urls: Vec<String>);

    /// Re-issue announcements to the discovery endpoints now.
    fn reannounce(&self) -> Result<(), EngineError>;

    /// Serialized descriptor, for sessions created from a bundle.
    fn descriptor(&self) -> Option<Vec<u8>>;

    /// Subscribe to the session's event stream.
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;

    /// Tear the session down inside the engine.
    fn destroy(&self) -> impl Future<Output = Result<(), EngineError>> + Send;
}

/// The transfer engine.
pub trait Engine: Send + Sync + 'static {
    /// Session handle type of this engine.
    type Handle: SessionHandle;

    /// Admit a descriptor, resolving once the engine knows the fingerprint.
    ///
    /// Adding content the engine already manages returns the existing handle.
    fn add(
        &self,
        descriptor: &Descriptor,
        announce: &[String],
    ) -> impl Future<Output = Result<Arc<Self::Handle>, EngineError>> + Send;
}
