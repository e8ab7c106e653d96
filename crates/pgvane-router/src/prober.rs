//! Background liveness prober.
//!
//! Runs one probe cycle per interval: every registered node is probed
//! concurrently (each probe bounded by its own timeout) and the results are
//! applied to the registry as a single batch. Cycles can also be forced
//! through a [`Notify`] trigger, and connection failures reported by the
//! pools are folded in between cycles so a broken node is re-verified
//! without waiting for the next tick.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use pgvane_common::{Backend, NodeEvent, RouterConfig};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration};
use tracing::{debug, info};

use crate::registry::{ProbeOutcome, ProbeRecord, Registry, Snapshot};

/// Periodically verifies node liveness and roles against the backend.
pub struct LivenessProber<B: Backend> {
    registry: Arc<Registry>,
    backend: Arc<B>,
    probe_interval: Duration,
    probe_timeout: Duration,
    trigger: Arc<Notify>,
    events: UnboundedReceiver<NodeEvent>,
}

impl<B: Backend> LivenessProber<B> {
    /// Creates a prober over the given registry and backend.
    ///
    /// # Arguments
    ///
    /// * `registry` - Registry that receives probe results
    /// * `backend` - Backend used to reach the nodes
    /// * `config` - Source of the probe interval and per-probe timeout
    /// * `trigger` - Fires an immediate cycle when notified
    /// * `events` - Out-of-band connection failures from the pools
    pub fn new(
        registry: Arc<Registry>,
        backend: Arc<B>,
        config: &RouterConfig,
        trigger: Arc<Notify>,
        events: UnboundedReceiver<NodeEvent>,
    ) -> Self {
        Self {
            registry,
            backend,
            probe_interval: config.probe_interval,
            probe_timeout: config.probe_timeout,
            trigger,
            events,
        }
    }

    /// Runs a single probe cycle and returns the published snapshot.
    ///
    /// All nodes are probed concurrently, including offline ones, so the
    /// registry stays current for the whole cluster. A probe that errors or
    /// exceeds the timeout counts as one failure for that node.
    pub async fn run_cycle(&self) -> Arc<Snapshot> {
        let snapshot = self.registry.current();
        let probes = snapshot.nodes().map(|node| {
            let backend = Arc::clone(&self.backend);
            let spec = node.spec.clone();
            let budget = self.probe_timeout;
            async move {
                let started = Instant::now();
                let outcome = match timeout(budget, backend.probe(&spec)).await {
                    Ok(Ok(role)) => ProbeOutcome::Responsive {
                        role,
                        latency_ms: started.elapsed().as_millis() as u64,
                    },
                    Ok(Err(err)) => ProbeOutcome::Unresponsive {
                        reason: err.to_string(),
                    },
                    Err(_) => ProbeOutcome::Unresponsive {
                        reason: format!("probe timed out after {budget:?}"),
                    },
                };
                ProbeRecord {
                    node_id: spec.id(),
                    outcome,
                }
            }
        });
        let records = join_all(probes).await;

        let next = self.registry.apply_cycle(records);
        debug!(
            version = next.version(),
            nodes = next.len(),
            primary = next.primary_id().unwrap_or("none"),
            "probe cycle applied"
        );
        next
    }

    /// Spawns the probe loop onto the runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(mut self) {
        info!(
            interval_ms = self.probe_interval.as_millis() as u64,
            timeout_ms = self.probe_timeout.as_millis() as u64,
            "liveness prober started"
        );
        let mut ticker = interval(self.probe_interval);
        // The first tick completes immediately; consume it so the first
        // scheduled cycle lands one full interval from now.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.trigger.notified() => {
                    debug!("probe cycle triggered on demand");
                }
                Some(event) = self.events.recv() => {
                    self.note_failure(event);
                    // Collapse a burst of failures into one reprobe.
                    while let Ok(event) = self.events.try_recv() {
                        self.note_failure(event);
                    }
                }
            }
            self.run_cycle().await;
        }
    }

    fn note_failure(&self, event: NodeEvent) {
        let NodeEvent::ConnectionFailed { node_id, reason } = event;
        debug!(node_id = %node_id, reason = %reason, "connection failure reported");
        self.registry.note_connection_failure(&node_id, &reason);
    }
}
