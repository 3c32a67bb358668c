//! Snapshot scheduler.
//!
//! Publishes two independent snapshot streams derived from the
//! [`Registry`]: sessions and peer observations. Two triggers feed the same
//! derivation:
//!
//! - registry change notifications (engine progress, completion, peer
//!   connections, admissions, removals)
//! - a fixed interval (2 seconds by default), so rates and ETAs stay live
//!   while the engine is quiet
//!
//! Every publish is a full re-derivation; consumers never see a snapshot
//! with partially updated fields.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::engine::{Engine, Fingerprint, Wire};
use crate::registry::{Registry, RegistryChange};
use crate::session::{synthetic_id, PeerObservation, Session};

/// Flatten per-session wire lists into peer observations.
///
/// Missing identifiers get a synthetic one valid for this snapshot only.
/// Within one session no identifier appears twice.
pub fn derive_peers(wires: Vec<(Fingerprint, Vec<Wire>)>) -> Vec<PeerObservation> {
    derive_peers_with(wires, &mut rand::thread_rng())
}

/// [`derive_peers`] drawing synthetic identifiers from `rng`.
///
/// Synthetic identifiers never collide with an identifier reported anywhere
/// in the same session.
pub fn derive_peers_with<R: Rng + ?Sized>(
    wires: Vec<(Fingerprint, Vec<Wire>)>,
    rng: &mut R,
) -> Vec<PeerObservation> {
    let mut observations = Vec::new();

    for (fingerprint, session_wires) in wires {
        let reported: HashSet<&str> = session_wires
            .iter()
            .filter_map(|w| w.peer_id.as_deref())
            .filter(|id| !id.is_empty())
            .collect();
        let mut seen = HashSet::new();

        for wire in &session_wires {
            let mut observation = PeerObservation::from_wire(&fingerprint, wire, rng);
            while observation.synthetic
                && (reported.contains(observation.id.as_str()) || seen.contains(&observation.id))
            {
                observation.id = synthetic_id(rng);
            }
            if seen.insert(observation.id.clone()) {
                observations.push(observation);
            } else {
                tracing::debug!(
                    "Dropping duplicate peer {} on session {}",
                    observation.id,
                    fingerprint
                );
            }
        }
    }

    observations
}

struct Outputs {
    sessions: watch::Sender<Vec<Session>>,
    peers: watch::Sender<Vec<PeerObservation>>,
}

impl Outputs {
    async fn publish<E: Engine>(&self, registry: &Registry<E>, change: RegistryChange) {
        if change.sessions() {
            self.sessions.send_replace(registry.refresh().await);
        }
        if change.peers() {
            self.peers.send_replace(derive_peers(registry.wires().await));
        }
    }
}

/// Periodic and event-driven snapshot publisher.
pub struct UpdateScheduler<E: Engine> {
    registry: Registry<E>,
    outputs: Arc<Outputs>,
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<E: Engine> std::fmt::Debug for UpdateScheduler<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateScheduler").finish_non_exhaustive()
    }
}

impl<E: Engine> UpdateScheduler<E> {
    /// Create a scheduler for `registry`. Nothing runs until [`start`](Self::start).
    pub fn new(registry: Registry<E>) -> Self {
        let (sessions, _) = watch::channel(Vec::new());
        let (peers, _) = watch::channel(Vec::new());
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            registry,
            outputs: Arc::new(Outputs { sessions, peers }),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Start publishing; the first snapshot is published immediately.
    ///
    /// Calling `start` on a running scheduler does nothing. A zero interval
    /// is replaced by the default refresh interval.
    pub async fn start(&self, interval: Duration) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let interval = if interval.is_zero() {
            tracing::warn!("Refresh interval must be non-zero, using the default");
            Duration::from_millis(crate::DEFAULT_REFRESH_INTERVAL_MS)
        } else {
            interval
        };

        let registry = self.registry.clone();
        let outputs = Arc::clone(&self.outputs);
        let mut changes = registry.subscribe_changes();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        outputs.publish(&registry, RegistryChange::All).await;
                    }
                    change = changes.recv() => match change {
                        Ok(change) => outputs.publish(&registry, change).await,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!("Scheduler skipped {} change notifications", skipped);
                            outputs.publish(&registry, RegistryChange::All).await;
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Scheduler received shutdown signal");
                        break;
                    }
                }
            }
        }));
    }

    /// Stop publishing and wait for the loop to exit.
    ///
    /// Returns once the loop is gone, even if it ended abnormally.
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };

        let _ = self.shutdown_tx.send(());
        if let Err(e) = task.await {
            if e.is_panic() {
                tracing::error!("Scheduler loop panicked: {}", e);
            }
        }
    }

    /// Whether the publishing loop is running.
    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Derive and publish now, outside the timer.
    pub async fn refresh_now(&self, change: RegistryChange) {
        self.outputs.publish(&self.registry, change).await;
    }

    /// Receiver of session snapshots.
    pub fn subscribe_sessions(&self) -> watch::Receiver<Vec<Session>> {
        self.outputs.sessions.subscribe()
    }

    /// Receiver of peer snapshots.
    pub fn subscribe_peers(&self) -> watch::Receiver<Vec<PeerObservation>> {
        self.outputs.peers.subscribe()
    }
}
