//! Failover coordination.
//!
//! The coordinator watches registry versions and classifies each published
//! snapshot as `Stable` or `Degraded`. On the transition into `Degraded` it
//! fires an immediate probe cycle so a failed primary is re-verified without
//! waiting for the schedule, and on every step it drains idle connections to
//! nodes that are down or operator-offline. Primary confirmation itself
//! lives in the registry; the coordinator observes, reports, and cleans up.
//!
//! The loop runs for the lifetime of the router: failover handling is not a
//! one-shot recovery but a permanent mode of operation.

use std::sync::Arc;

use pgvane_common::{Backend, Health};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::{Registry, Snapshot};
use pgvane_pool::ConnectionManager;

/// Cluster-level state as seen by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ClusterState {
    /// Exactly one confirmed primary; writes flow.
    Stable { primary: String },
    /// No confirmed primary, or more than one claimant. Writes fail fast,
    /// reads continue against whatever is healthy.
    Degraded { reason: String },
}

impl ClusterState {
    pub fn is_stable(&self) -> bool {
        matches!(self, ClusterState::Stable { .. })
    }
}

/// Watches the registry and drives the cluster between `Stable` and
/// `Degraded`.
pub struct FailoverCoordinator<B: Backend> {
    registry: Arc<Registry>,
    manager: Arc<ConnectionManager<B>>,
    probe_trigger: Arc<Notify>,
    versions: watch::Receiver<u64>,
    state_tx: watch::Sender<ClusterState>,
}

impl<B: Backend> FailoverCoordinator<B> {
    /// Creates a coordinator and the state channel observers read from.
    ///
    /// The initial state classifies the registry's current snapshot, so
    /// callers should apply the first probe cycle before constructing the
    /// coordinator.
    pub fn new(
        registry: Arc<Registry>,
        manager: Arc<ConnectionManager<B>>,
        probe_trigger: Arc<Notify>,
    ) -> (Self, watch::Receiver<ClusterState>) {
        let versions = registry.subscribe();
        let initial = Self::classify(&registry.current());
        info!(state = ?initial, "failover coordinator initialized");
        let (state_tx, state_rx) = watch::channel(initial);
        (
            Self {
                registry,
                manager,
                probe_trigger,
                versions,
                state_tx,
            },
            state_rx,
        )
    }

    /// Maps a snapshot to the cluster state it implies.
    pub fn classify(snapshot: &Snapshot) -> ClusterState {
        if let Some(claimants) = snapshot.ambiguity() {
            return ClusterState::Degraded {
                reason: format!("multiple primaries: {claimants}"),
            };
        }
        match snapshot.primary_id() {
            Some(primary) => ClusterState::Stable {
                primary: primary.to_string(),
            },
            None => ClusterState::Degraded {
                reason: "no confirmed primary".to_string(),
            },
        }
    }

    /// Spawns the coordination loop onto the runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(mut self) {
        loop {
            if self.versions.changed().await.is_err() {
                break;
            }
            self.versions.borrow_and_update();
            let snapshot = self.registry.current();
            self.step(&snapshot);
        }
    }

    /// Processes one published snapshot.
    fn step(&self, snapshot: &Snapshot) {
        let next = Self::classify(snapshot);
        let previous = self.state_tx.borrow().clone();
        if next != previous {
            match (&previous, &next) {
                (ClusterState::Stable { primary }, ClusterState::Degraded { reason }) => {
                    warn!(
                        lost_primary = %primary,
                        reason = %reason,
                        "cluster degraded, forcing reprobe"
                    );
                    self.probe_trigger.notify_one();
                }
                (ClusterState::Degraded { .. }, ClusterState::Stable { primary }) => {
                    info!(primary = %primary, "cluster stable");
                }
                (ClusterState::Stable { primary: from }, ClusterState::Stable { primary: to }) => {
                    info!(from = %from, to = %to, "confirmed primary moved");
                }
                (ClusterState::Degraded { .. }, ClusterState::Degraded { reason }) => {
                    debug!(reason = %reason, "cluster still degraded");
                }
            }
            self.state_tx.send_replace(next);
        }

        // Connections already handed out keep running until their leases
        // drop; this only empties the idle queues of unusable nodes.
        for (id, node) in snapshot.iter() {
            if node.offline || node.health == Health::Down {
                match self.manager.retire_node(id) {
                    Ok(drained) if drained > 0 => {
                        info!(node_id = %id, drained, "retired idle connections");
                    }
                    Ok(_) => {}
                    Err(err) => debug!(node_id = %id, %err, "retire skipped"),
                }
            }
        }
    }
}
