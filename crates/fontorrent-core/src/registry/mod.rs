//! Session registry.
//!
//! The registry is the single owner of session state: it maps each content
//! fingerprint to its engine handle and the last captured [`Session`]. Engine
//! events reach it through one listener task per session, which re-captures
//! the session and broadcasts a [`RegistryChange`] to observers.
//!
//! Sessions are kept in registration order.

use std::sync::{Arc, Weak};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use crate::engine::{Descriptor, Engine, EngineEvent, Fingerprint, SessionHandle, Wire};
use crate::error::AdmissionError;
use crate::session::{AggregateStats, Session};
use crate::trackers::{self, SchemePolicy};

/// Capacity of the change notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// What part of the registry changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryChange {
    /// Session state (progress, metadata, membership)
    Sessions,
    /// Peer connections
    Peers,
    /// Both
    All,
}

impl RegistryChange {
    /// Whether session snapshots are affected.
    #[must_use]
    pub const fn sessions(self) -> bool {
        matches!(self, Self::Sessions | Self::All)
    }

    /// Whether peer snapshots are affected.
    #[must_use]
    pub const fn peers(self) -> bool {
        matches!(self, Self::Peers | Self::All)
    }
}

/// How an engine warning is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WarningClass {
    /// Expected noise (unsupported tracker schemes), diagnostics only
    Expected,
    /// WebRTC connection setup problem
    Ice,
    /// Anything else
    Other,
}

pub(crate) fn classify_warning(message: &str) -> WarningClass {
    let lower = message.to_ascii_lowercase();
    if lower.contains("unsupported tracker protocol") {
        WarningClass::Expected
    } else if lower.contains("rtcpeerconnection") {
        WarningClass::Ice
    } else {
        WarningClass::Other
    }
}

struct Entry<H> {
    handle: Arc<H>,
    session: Session,
    listener: JoinHandle<()>,
}

struct Inner<E: Engine> {
    engine: E,
    entries: RwLock<Vec<Entry<E::Handle>>>,
    changes: broadcast::Sender<RegistryChange>,
}

impl<E: Engine> Inner<E> {
    fn notify(&self, change: RegistryChange) {
        // No receivers is fine: nobody is observing yet.
        let _ = self.changes.send(change);
    }

    async fn sync(&self, fingerprint: &Fingerprint) -> Option<Session> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| &e.session.fingerprint == fingerprint)?;
        entry.session = Session::capture(entry.handle.as_ref());
        Some(entry.session.clone())
    }

    async fn handle_event(&self, fingerprint: &Fingerprint, event: EngineEvent) {
        match event {
            EngineEvent::Download(_) | EngineEvent::Upload(_) => {
                self.sync(fingerprint).await;
                self.notify(RegistryChange::Sessions);
            }
            EngineEvent::Metadata => {
                if let Some(session) = self.sync(fingerprint).await {
                    tracing::info!(
                        "Metadata received for {} ({} file(s))",
                        session.display_name(),
                        session.files.len()
                    );
                }
                self.notify(RegistryChange::Sessions);
            }
            EngineEvent::Ready => {
                tracing::debug!("Session {} ready, looking for peers", fingerprint);
                self.sync(fingerprint).await;
                self.notify(RegistryChange::Sessions);
            }
            EngineEvent::Done => {
                if let Some(session) = self.sync(fingerprint).await {
                    tracing::info!(
                        "Session completed: {}, continuing to seed",
                        session.display_name()
                    );
                }
                self.notify(RegistryChange::Sessions);
            }
            EngineEvent::Wire {
                peer_id,
                remote_address,
            } => {
                tracing::debug!(
                    "Peer {} connected to {} via {}",
                    peer_id.as_deref().unwrap_or("?"),
                    fingerprint,
                    remote_address.as_deref().unwrap_or("WebRTC")
                );
                self.notify(RegistryChange::Peers);
            }
            EngineEvent::NoPeers => {
                tracing::info!("No peers for session {}", fingerprint);
            }
            EngineEvent::Tracker(url) => {
                tracing::debug!("Session {} connected to tracker {}", fingerprint, url);
            }
            EngineEvent::Warning(message) => match classify_warning(&message) {
                WarningClass::Expected => {
                    tracing::debug!("Session {} warning: {}", fingerprint, message);
                }
                WarningClass::Ice => {
                    tracing::warn!("WebRTC ICE warning for {}: {}", fingerprint, message);
                }
                WarningClass::Other => {
                    tracing::warn!("Session {} warning: {}", fingerprint, message);
                }
            },
            EngineEvent::Error(message) => {
                tracing::error!("Session {} error: {}", fingerprint, message);
            }
        }
    }
}

fn spawn_listener<E: Engine>(
    inner: Weak<Inner<E>>,
    fingerprint: Fingerprint,
    mut events: broadcast::Receiver<EngineEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Listener for {} skipped {} events", fingerprint, skipped);
                    None
                }
                Err(RecvError::Closed) => break,
            };

            let Some(inner) = inner.upgrade() else {
                break;
            };

            match event {
                Some(event) => inner.handle_event(&fingerprint, event).await,
                None => {
                    inner.sync(&fingerprint).await;
                    inner.notify(RegistryChange::All);
                }
            }
        }
        tracing::debug!("Listener for {} stopped", fingerprint);
    })
}

/// Registry of live sessions.
pub struct Registry<E: Engine> {
    inner: Arc<Inner<E>>,
}

impl<E: Engine> Clone for Registry<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Engine> std::fmt::Debug for Registry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

impl<E: Engine> Registry<E> {
    /// Create an empty registry on top of `engine`.
    pub fn new(engine: E) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                engine,
                entries: RwLock::new(Vec::new()),
                changes,
            }),
        }
    }

    /// Subscribe to change notifications.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<RegistryChange> {
        self.inner.changes.subscribe()
    }

    /// Admit a session.
    ///
    /// The session's announce list is restricted to valid endpoints from
    /// `trackers` plus its own. If the engine returns content that is already
    /// registered, the existing record is returned and nothing is added.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Malformed`] for invalid descriptors and
    /// [`AdmissionError::Rejected`] if the engine refuses them.
    pub async fn admit(
        &self,
        descriptor: &Descriptor,
        trackers: &[String],
        policy: SchemePolicy,
    ) -> Result<Session, AdmissionError> {
        descriptor.validate()?;
        tracing::debug!("Admitting {}", descriptor.summary());

        let handle = self
            .inner
            .engine
            .add(descriptor, trackers)
            .await
            .map_err(|e| {
                tracing::warn!("Engine rejected {}: {}", descriptor.summary(), e);
                AdmissionError::from(e)
            })?;

        let fingerprint = handle.fingerprint();
        let announce = trackers::sanitize(
            trackers.iter().cloned().chain(handle.announce()),
            policy,
        );
        handle.set_announce(announce);

        let mut entries = self.inner.entries.write().await;
        if let Some(existing) = entries
            .iter_mut()
            .find(|e| e.session.fingerprint == fingerprint)
        {
            tracing::debug!("Session {} already registered", fingerprint);
            existing.session = Session::capture(existing.handle.as_ref());
            return Ok(existing.session.clone());
        }

        let events = handle.subscribe();
        let listener = spawn_listener(Arc::downgrade(&self.inner), fingerprint.clone(), events);
        let session = Session::capture(handle.as_ref());
        entries.push(Entry {
            handle,
            session: session.clone(),
            listener,
        });
        drop(entries);

        tracing::info!(
            "Session added: {} ({})",
            session.display_name(),
            fingerprint
        );
        self.inner.notify(RegistryChange::All);
        Ok(session)
    }

    /// Remove a session and destroy it in the engine.
    ///
    /// Returns whether a session was removed; unknown fingerprints are ignored.
    pub async fn remove(&self, fingerprint: &Fingerprint) -> bool {
        let entry = {
            let mut entries = self.inner.entries.write().await;
            let Some(index) = entries
                .iter()
                .position(|e| &e.session.fingerprint == fingerprint)
            else {
                return false;
            };
            entries.remove(index)
        };

        tracing::info!("Removing session: {}", entry.session.display_name());
        Self::teardown(entry).await;
        self.inner.notify(RegistryChange::All);
        true
    }

    /// Remove every session (coordinator teardown).
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.inner.entries.write().await.drain(..).collect();
        if drained.is_empty() {
            return;
        }

        tracing::info!("Destroying {} session(s)", drained.len());
        for entry in drained {
            Self::teardown(entry).await;
        }
        self.inner.notify(RegistryChange::All);
    }

    async fn teardown(entry: Entry<E::Handle>) {
        entry.listener.abort();
        if let Err(e) = entry.handle.destroy().await {
            tracing::warn!(
                "Failed to destroy session {}: {}",
                entry.session.fingerprint,
                e
            );
        }
    }

    /// The cached session for `fingerprint`.
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Option<Session> {
        self.inner
            .entries
            .read()
            .await
            .iter()
            .find(|e| &e.session.fingerprint == fingerprint)
            .map(|e| e.session.clone())
    }

    /// All cached sessions in registration order.
    pub async fn list_all(&self) -> Vec<Session> {
        self.inner
            .entries
            .read()
            .await
            .iter()
            .map(|e| e.session.clone())
            .collect()
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.inner.entries.read().await.len()
    }

    /// Whether no session is registered.
    pub async fn is_empty(&self) -> bool {
        self.inner.entries.read().await.is_empty()
    }

    /// Re-capture one session from its handle.
    pub async fn sync(&self, fingerprint: &Fingerprint) -> Option<Session> {
        self.inner.sync(fingerprint).await
    }

    /// Re-capture every session and return the fresh snapshots.
    pub async fn refresh(&self) -> Vec<Session> {
        let mut entries = self.inner.entries.write().await;
        entries
            .iter_mut()
            .map(|entry| {
                entry.session = Session::capture(entry.handle.as_ref());
                entry.session.clone()
            })
            .collect()
    }

    /// Current peer connections of every session.
    pub async fn wires(&self) -> Vec<(Fingerprint, Vec<Wire>)> {
        self.inner
            .entries
            .read()
            .await
            .iter()
            .map(|e| (e.session.fingerprint.clone(), e.handle.wires()))
            .collect()
    }

    /// Engine handles in registration order.
    pub async fn handles(&self) -> Vec<Arc<E::Handle>> {
        self.inner
            .entries
            .read()
            .await
            .iter()
            .map(|e| Arc::clone(&e.handle))
            .collect()
    }

    /// Serialized descriptor of a session created from a bundle.
    pub async fn descriptor(&self, fingerprint: &Fingerprint) -> Option<Vec<u8>> {
        self.inner
            .entries
            .read()
            .await
            .iter()
            .find(|e| &e.session.fingerprint == fingerprint)
            .and_then(|e| e.handle.descriptor())
    }

    /// Merge `trackers` into every session's announce list and re-announce.
    ///
    /// Existing endpoints are kept. Re-announce failures are logged per
    /// session.
    pub async fn apply_trackers(&self, trackers: &[String]) {
        let mut entries = self.inner.entries.write().await;
        for entry in entries.iter_mut() {
            let merged = trackers::merge(trackers, &entry.handle.announce());
            entry.handle.set_announce(merged);
            if let Err(e) = entry.handle.reannounce() {
                tracing::warn!(
                    "Failed to re-announce {} after tracker change: {}",
                    entry.session.fingerprint,
                    e
                );
            }
            entry.session = Session::capture(entry.handle.as_ref());
        }
        drop(entries);
        self.inner.notify(RegistryChange::Sessions);
    }

    /// Ask every session to announce now. Returns how many succeeded.
    pub async fn reannounce_all(&self) -> usize {
        let entries = self.inner.entries.read().await;
        let mut announced = 0;
        for entry in entries.iter() {
            tracing::info!("Forcing announce for {}", entry.session.display_name());
            match entry.handle.reannounce() {
                Ok(()) => announced += 1,
                Err(e) => {
                    tracing::debug!("Announce failed for {}: {}", entry.session.fingerprint, e);
                }
            }
        }
        announced
    }

    /// Totals across all sessions, from fresh captures.
    pub async fn totals(&self) -> AggregateStats {
        AggregateStats::from_sessions(&self.refresh().await)
    }
}
