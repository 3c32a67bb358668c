//! Session coordinator.
//!
//! The [`Coordinator`] is the one object the presentation layer talks to. It
//! owns the [`Registry`], the [`TrackerStore`] and the [`UpdateScheduler`] and
//! runs folder exports through an [`ExportPipeline`]. Commands delegate to
//! those components and then trigger a snapshot refresh so observers see the
//! result without waiting for the next tick.

use std::path::PathBuf;

use tokio::sync::{watch, Mutex};

use crate::config::Config;
use crate::engine::{Descriptor, Engine, Fingerprint};
use crate::error::{AdmissionError, EngineError, Error, ExportError, Result};
use crate::export::{ExportPipeline, ExportProgress, ExportReport, StorageHost};
use crate::prefs::PreferenceStore;
use crate::registry::{Registry, RegistryChange};
use crate::scheduler::UpdateScheduler;
use crate::session::{AggregateStats, PeerObservation, Session};
use crate::trackers::{SchemePolicy, TrackerStore};

/// Facade over the registry, tracker store, scheduler and export pipeline.
pub struct Coordinator<E: Engine, P: PreferenceStore> {
    config: Config,
    registry: Registry<E>,
    trackers: Mutex<TrackerStore<P>>,
    scheduler: UpdateScheduler<E>,
    exporter: ExportPipeline,
}

impl<E: Engine, P: PreferenceStore> std::fmt::Debug for Coordinator<E, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<E: Engine, P: PreferenceStore> Coordinator<E, P> {
    /// Build a coordinator and start publishing snapshots.
    ///
    /// The tracker list is loaded from `prefs`, falling back to the built-in
    /// defaults.
    pub async fn start(engine: E, prefs: P, config: Config) -> Self {
        let policy = SchemePolicy::from_config(&config.trackers);
        let trackers = TrackerStore::load(prefs, policy);
        tracing::debug!("Loaded {} tracker(s)", trackers.trackers().len());

        let registry = Registry::new(engine);
        let scheduler = UpdateScheduler::new(registry.clone());
        scheduler.start(config.scheduler.refresh_interval).await;

        Self {
            exporter: ExportPipeline::new(config.export.clone()),
            config,
            registry,
            trackers: Mutex::new(trackers),
            scheduler,
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Registry<E> {
        &self.registry
    }

    /// Admit a session announcing to the configured trackers.
    ///
    /// Admitting content that is already registered returns the existing
    /// session.
    ///
    /// # Errors
    ///
    /// Returns an [`AdmissionError`] for malformed or rejected descriptors.
    pub async fn admit_session(
        &self,
        descriptor: &Descriptor,
    ) -> std::result::Result<Session, AdmissionError> {
        let (trackers, policy) = {
            let store = self.trackers.lock().await;
            (store.trackers().to_vec(), store.policy())
        };

        let session = self.registry.admit(descriptor, &trackers, policy).await?;
        self.scheduler.refresh_now(RegistryChange::All).await;
        Ok(session)
    }

    /// Create (seed) a session from local files and return its serialized
    /// descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be admitted or the engine does
    /// not produce descriptor bytes.
    pub async fn create_descriptor(&self, files: Vec<PathBuf>) -> Result<Vec<u8>> {
        tracing::info!("Creating session from {} file(s)", files.len());
        let session = self.admit_session(&Descriptor::Bundle(files)).await?;

        self.registry
            .descriptor(&session.fingerprint)
            .await
            .ok_or(Error::Engine(EngineError::Unsupported("descriptor export")))
    }

    /// Remove a session. Unknown fingerprints are ignored.
    pub async fn remove_session(&self, fingerprint: &Fingerprint) {
        if self.registry.remove(fingerprint).await {
            self.scheduler.refresh_now(RegistryChange::All).await;
        } else {
            tracing::debug!("Remove ignored, {} is not registered", fingerprint);
        }
    }

    /// The registry's current record of one session.
    pub async fn session(&self, fingerprint: &Fingerprint) -> Option<Session> {
        self.registry.lookup(fingerprint).await
    }

    /// Current snapshots of all sessions in registration order.
    pub async fn sessions(&self) -> Vec<Session> {
        self.registry.refresh().await
    }

    /// Export every file of a session into a directory granted by `storage`.
    ///
    /// # Errors
    ///
    /// See [`ExportPipeline::export_session`].
    pub async fn export_session<S, F>(
        &self,
        fingerprint: &Fingerprint,
        storage: &S,
        on_progress: F,
    ) -> std::result::Result<ExportReport, ExportError>
    where
        S: StorageHost,
        F: FnMut(ExportProgress) + Send,
    {
        self.exporter
            .export_session(&self.registry, fingerprint, storage, on_progress)
            .await
    }

    /// Export one file of a session.
    ///
    /// # Errors
    ///
    /// See [`ExportPipeline::export_file`].
    pub async fn export_file<S, F>(
        &self,
        fingerprint: &Fingerprint,
        index: usize,
        storage: &S,
        on_progress: F,
    ) -> std::result::Result<ExportReport, ExportError>
    where
        S: StorageHost,
        F: FnMut(ExportProgress) + Send,
    {
        self.exporter
            .export_file(&self.registry, fingerprint, index, storage, on_progress)
            .await
    }

    /// The configured tracker list.
    pub async fn trackers(&self) -> Vec<String> {
        self.trackers.lock().await.trackers().to_vec()
    }

    /// Replace the tracker list and propagate it to live sessions.
    ///
    /// Live sessions keep their existing endpoints; the new ones are added
    /// and announced to immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoValidTrackers`] if nothing in `list` is usable.
    pub async fn set_trackers<I, S>(&self, list: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let saved = self.trackers.lock().await.save(list)?.to_vec();
        tracing::info!("Tracker list updated ({} endpoint(s))", saved.len());

        self.registry.apply_trackers(&saved).await;
        self.scheduler.refresh_now(RegistryChange::Sessions).await;
        Ok(saved)
    }

    /// Restore the built-in tracker list and propagate it to live sessions.
    pub async fn reset_trackers(&self) -> Vec<String> {
        let restored = self.trackers.lock().await.reset().to_vec();
        tracing::info!("Tracker list reset to defaults");

        self.registry.apply_trackers(&restored).await;
        self.scheduler.refresh_now(RegistryChange::Sessions).await;
        restored
    }

    /// Ask every session to announce now. Returns how many sessions did.
    pub async fn force_announce(&self) -> usize {
        let announced = self.registry.reannounce_all().await;
        tracing::debug!("Forced announce on {} session(s)", announced);
        announced
    }

    /// Totals across all sessions.
    pub async fn stats(&self) -> AggregateStats {
        self.registry.totals().await
    }

    /// Receiver of session snapshots.
    pub fn subscribe_sessions(&self) -> watch::Receiver<Vec<Session>> {
        self.scheduler.subscribe_sessions()
    }

    /// Receiver of peer snapshots.
    pub fn subscribe_peers(&self) -> watch::Receiver<Vec<PeerObservation>> {
        self.scheduler.subscribe_peers()
    }

    /// Stop publishing snapshots and destroy every session.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down coordinator");
        self.scheduler.stop().await;
        self.registry.shutdown().await;
        self.scheduler.refresh_now(RegistryChange::All).await;
    }
}
