//! Snapshot types handed to the presentation layer.
//!
//! A [`Session`] is the registry's cached view of one engine session. It is
//! re-captured from the engine handle whenever the session changes, so every
//! aggregate field always comes from a single read of the handle.

use std::time::Duration;

use rand::Rng;
use serde::{Serialize, Serializer};

use crate::engine::{ContentFile, Fingerprint, SessionHandle, Transport, Wire};

/// Display name used while metadata is pending.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Length of generated peer identifiers.
const SYNTHETIC_ID_LEN: usize = 9;

/// One file of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionFile {
    /// Path relative to the session root
    pub path: String,
    /// Size in bytes
    pub length: u64,
    /// Bytes downloaded
    pub downloaded: u64,
    /// Completion fraction (0.0 - 1.0)
    pub progress: f64,
}

impl SessionFile {
    fn capture<F: ContentFile>(file: &F) -> Self {
        Self {
            path: file.path(),
            length: file.length(),
            downloaded: file.downloaded(),
            progress: file.progress(),
        }
    }
}

/// Snapshot of one managed transfer session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    /// Content fingerprint
    pub fingerprint: Fingerprint,
    /// Display name, absent until metadata arrives
    pub name: Option<String>,
    /// Total size in bytes
    pub length: u64,
    /// Files in listed order
    pub files: Vec<SessionFile>,
    /// Magnet URI for sharing
    pub magnet_uri: Option<String>,
    /// Completion fraction (0.0 - 1.0)
    pub progress: f64,
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
    /// Upload/download ratio
    pub ratio: f64,
    /// Estimated time remaining
    #[serde(serialize_with = "serialize_millis")]
    pub time_remaining: Option<Duration>,
    /// Metadata resolved and storage ready
    pub ready: bool,
    /// Download complete
    pub done: bool,
    /// Discovery endpoints
    pub announce: Vec<String>,
}

impl Session {
    /// Capture a consistent snapshot from an engine handle.
    pub fn capture<H: SessionHandle>(handle: &H) -> Self {
        let stats = handle.stats();
        let files: Vec<SessionFile> = handle.files().iter().map(SessionFile::capture).collect();
        let length = match handle.length() {
            0 => files.iter().map(|f| f.length).sum(),
            n => n,
        };

        Self {
            fingerprint: handle.fingerprint(),
            name: handle.name().filter(|n| !n.is_empty()),
            length,
            files,
            magnet_uri: handle.magnet_uri(),
            progress: stats.progress,
            downloaded: stats.downloaded,
            uploaded: stats.uploaded,
            download_speed: stats.download_speed,
            upload_speed: stats.upload_speed,
            num_peers: stats.num_peers,
            ratio: stats.uploaded as f64 / stats.downloaded.max(1) as f64,
            time_remaining: stats.time_remaining,
            ready: stats.ready,
            done: stats.done,
            announce: handle.announce(),
        }
    }

    /// Name for display, falling back to [`UNKNOWN_NAME`].
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_NAME)
    }

    /// Whether the file list is known.
    #[must_use]
    pub fn has_files(&self) -> bool {
        !self.files.is_empty()
    }
}

fn serialize_millis<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
        None => serializer.serialize_none(),
    }
}

/// A peer connection seen in one snapshot.
///
/// Identifiers marked `synthetic` were generated for this snapshot only and
/// must not be used as stable keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerObservation {
    /// Session the peer is connected to
    pub session: Fingerprint,
    /// Peer identifier
    pub id: String,
    /// Network address, or a synthetic one for WebRTC peers
    pub address: String,
    /// Transport classification
    pub transport: Transport,
    /// The identifier was generated, not reported by the engine
    pub synthetic: bool,
}

impl PeerObservation {
    /// Build an observation from an engine wire, filling in gaps.
    pub fn from_wire<R: Rng + ?Sized>(session: &Fingerprint, wire: &Wire, rng: &mut R) -> Self {
        let transport = wire.transport.unwrap_or(if wire.remote_address.is_some() {
            Transport::Tcp
        } else {
            Transport::WebRtc
        });
        let address = wire
            .remote_address
            .clone()
            .unwrap_or_else(|| format!("webrtc-{}", synthetic_id(rng)));

        match wire.peer_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => Self {
                session: session.clone(),
                id: id.to_string(),
                address,
                transport,
                synthetic: false,
            },
            None => Self {
                session: session.clone(),
                id: synthetic_id(rng),
                address,
                transport,
                synthetic: true,
            },
        }
    }
}

/// Generate a short base-36 identifier.
pub fn synthetic_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    (0..SYNTHETIC_ID_LEN)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect()
}

/// Totals across all sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    /// Number of sessions
    pub total_sessions: usize,
    /// Connected peers across sessions
    pub total_peers: usize,
    /// Summed download rate
    pub total_download_speed: u64,
    /// Summed upload rate
    pub total_upload_speed: u64,
    /// Summed downloaded bytes
    pub total_downloaded: u64,
    /// Summed uploaded bytes
    pub total_uploaded: u64,
}

impl AggregateStats {
    /// Sum the counters of the given sessions.
    pub fn from_sessions<'a>(sessions: impl IntoIterator<Item = &'a Session>) -> Self {
        sessions.into_iter().fold(Self::default(), |mut acc, s| {
            acc.total_sessions += 1;
            acc.total_peers += s.num_peers;
            acc.total_download_speed += s.download_speed;
            acc.total_upload_speed += s.upload_speed;
            acc.total_downloaded += s.downloaded;
            acc.total_uploaded += s.uploaded;
            acc
        })
    }
}
