//! The router facade.
//!
//! One [`Router`] owns the registry, the connection pools, the background
//! prober, and the failover coordinator. It is constructed once per process
//! and handed by reference to whatever serves requests; there is no global
//! state. Startup runs a full probe cycle before returning, so the first
//! routing decision already works against observed roles rather than
//! configuration guesses.

use std::fmt;
use std::sync::Arc;

use pgvane_common::{Backend, Health, Intent, Result, RouterConfig, VaneError};
use pgvane_pool::{ConnectionManager, Lease};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::coordinator::{ClusterState, FailoverCoordinator};
use crate::policy::{RoutingDecision, RoutingPolicy};
use crate::prober::LivenessProber;
use crate::registry::Registry;
use crate::status::RouterStatus;

/// Read/write-splitting connection router for a replicated cluster.
pub struct Router<B: Backend> {
    registry: Arc<Registry>,
    manager: Arc<ConnectionManager<B>>,
    policy: RoutingPolicy,
    state_rx: watch::Receiver<ClusterState>,
    probe_trigger: Arc<Notify>,
    prober_handle: JoinHandle<()>,
    coordinator_handle: JoinHandle<()>,
}

impl<B: Backend> Router<B> {
    /// Validates the configuration, probes every node once, and starts the
    /// background tasks.
    ///
    /// The initial probe cycle completes before this returns: a router that
    /// came up against a reachable cluster can route writes immediately.
    ///
    /// # Errors
    ///
    /// Returns [`VaneError::Config`] when the configuration is unusable.
    /// An unreachable cluster is not a startup error; the router comes up
    /// degraded and keeps probing.
    pub async fn start(config: RouterConfig, backend: B) -> Result<Self> {
        config.validate()?;

        let backend = Arc::new(backend);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Registry::new(&config));
        let manager = Arc::new(ConnectionManager::new(
            &config,
            Arc::clone(&backend),
            events_tx,
        ));
        let probe_trigger = Arc::new(Notify::new());

        let prober = LivenessProber::new(
            Arc::clone(&registry),
            backend,
            &config,
            Arc::clone(&probe_trigger),
            events_rx,
        );
        prober.run_cycle().await;

        let (coordinator, state_rx) = FailoverCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&manager),
            Arc::clone(&probe_trigger),
        );

        let prober_handle = prober.spawn();
        let coordinator_handle = coordinator.spawn();
        let initial_state = state_rx.borrow().clone();
        info!(
            nodes = config.nodes.len(),
            state = ?initial_state,
            "router started"
        );

        Ok(Self {
            registry,
            manager,
            policy: RoutingPolicy::new(),
            state_rx,
            probe_trigger,
            prober_handle,
            coordinator_handle,
        })
    }

    /// Selects a target node for the given intent against the last
    /// completed probe snapshot. Never blocks on probing.
    ///
    /// # Errors
    ///
    /// * [`VaneError::NoPrimaryAvailable`] - write without a confirmed primary
    /// * [`VaneError::AmbiguousPrimary`] - write while several nodes claim
    ///   the primary role
    /// * [`VaneError::NoNodeAvailable`] - read with no healthy node
    pub fn route(&self, intent: Intent) -> Result<RoutingDecision> {
        self.policy.route(intent, &self.registry.current())
    }

    /// Leases a connection to the node a routing decision selected.
    ///
    /// The decision is revalidated against the current snapshot first: a
    /// node that has gone down or offline fails with [`VaneError::NodeDown`],
    /// and a write decision whose target is no longer the confirmed primary
    /// fails with [`VaneError::NoPrimaryAvailable`] rather than letting the
    /// write reach a demoted node. Callers route again on either error.
    ///
    /// # Errors
    ///
    /// * [`VaneError::UnknownNode`] - decision names an unconfigured node
    /// * [`VaneError::NodeDown`] - node is down, offline, or unreachable
    /// * [`VaneError::AcquireTimeout`] - pool saturated past the deadline
    pub async fn acquire(&self, decision: &RoutingDecision) -> Result<Lease<B>> {
        let snapshot = self.registry.current();
        let node = snapshot
            .get(&decision.node_id)
            .ok_or_else(|| VaneError::UnknownNode(decision.node_id.clone()))?;
        if node.health == Health::Down || node.offline {
            return Err(VaneError::NodeDown(decision.node_id.clone()));
        }
        if decision.intent == Intent::Write {
            if let Some(claimants) = snapshot.ambiguity() {
                return Err(VaneError::AmbiguousPrimary(claimants.to_string()));
            }
            if snapshot.primary_id() != Some(decision.node_id.as_str()) {
                debug!(
                    node_id = %decision.node_id,
                    decided_at = decision.snapshot_version,
                    current = snapshot.version(),
                    "write target lost primary status between route and acquire"
                );
                return Err(VaneError::NoPrimaryAvailable);
            }
        }
        self.manager.acquire(&decision.node_id).await
    }

    /// Routes and acquires in one call.
    pub async fn checkout(&self, intent: Intent) -> Result<Lease<B>> {
        let decision = self.route(intent)?;
        self.acquire(&decision).await
    }

    /// Current cluster state as tracked by the failover coordinator.
    pub fn cluster_state(&self) -> ClusterState {
        self.state_rx.borrow().clone()
    }

    /// Subscribes to cluster state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ClusterState> {
        self.state_rx.clone()
    }

    /// Forces a probe cycle ahead of schedule.
    pub fn trigger_probe(&self) {
        self.probe_trigger.notify_one();
    }

    /// Snapshot of roles, health, and pool occupancy for every node.
    pub fn status(&self) -> RouterStatus {
        RouterStatus::assemble(
            &self.registry.current(),
            self.cluster_state(),
            &self.manager.stats(),
        )
    }

    /// Takes a node out of routing and drains its idle connections.
    ///
    /// The node keeps being probed so its state stays current, but it will
    /// not serve reads, hold the primary pointer, or accept new leases
    /// until restored. The flag survives probe cycles; only
    /// [`set_node_online`](Self::set_node_online) clears it.
    pub fn set_node_offline(&self, node_id: &str) -> Result<()> {
        self.ensure_known(node_id)?;
        self.registry.set_offline(node_id, true);
        let drained = self.manager.retire_node(node_id)?;
        info!(node_id, drained, "node taken offline");
        Ok(())
    }

    /// Returns an operator-offline node to routing.
    pub fn set_node_online(&self, node_id: &str) -> Result<()> {
        self.ensure_known(node_id)?;
        self.registry.set_offline(node_id, false);
        info!(node_id, "node brought online");
        Ok(())
    }

    fn ensure_known(&self, node_id: &str) -> Result<()> {
        if self.registry.current().get(node_id).is_none() {
            return Err(VaneError::UnknownNode(node_id.to_string()));
        }
        Ok(())
    }
}

impl<B: Backend> fmt::Debug for Router<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("state", &*self.state_rx.borrow())
            .finish_non_exhaustive()
    }
}

impl<B: Backend> Drop for Router<B> {
    fn drop(&mut self) {
        self.prober_handle.abort();
        self.coordinator_handle.abort();
    }
}
