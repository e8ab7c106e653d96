//! Node registry with versioned, copy-on-write cluster snapshots.
//!
//! The registry is the single point of truth for node roles and health.
//! Readers load an immutable [`Snapshot`] without locking; writers rebuild
//! the node map under a mutex and publish the result atomically with a
//! monotonically increasing version. Every published version is announced
//! on a watch channel so downstream tasks can react to cluster changes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;

use arc_swap::ArcSwap;
use pgvane_common::{Health, NodeSpec, PromotionPolicy, Role, RouterConfig};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Result of probing a single node.
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    /// The node answered the role query within the probe timeout.
    Responsive { role: Role, latency_ms: u64 },
    /// The probe failed or timed out.
    Unresponsive { reason: String },
}

/// One node's probe result within a cycle.
#[derive(Debug, Clone)]
pub struct ProbeRecord {
    pub node_id: String,
    pub outcome: ProbeOutcome,
}

/// Tracked state for a single node.
#[derive(Debug, Clone)]
pub struct NodeState {
    pub spec: NodeSpec,
    pub role: Role,
    pub health: Health,
    /// Operator-excluded nodes are probed but never routed to.
    pub offline: bool,
    pub consecutive_failures: u32,
    pub last_probe_at: Option<Instant>,
    pub last_probe_ms: Option<u64>,
    pub last_error: Option<String>,
}

impl NodeState {
    fn new(spec: NodeSpec) -> Self {
        Self {
            spec,
            role: Role::Unknown,
            health: Health::Suspect,
            offline: false,
            consecutive_failures: 0,
            last_probe_at: None,
            last_probe_ms: None,
            last_error: None,
        }
    }

    /// Whether this node may claim the confirmed-primary pointer.
    fn is_primary_candidate(&self) -> bool {
        self.role == Role::Primary && self.health == Health::Healthy && !self.offline
    }
}

/// Immutable view of the cluster at a single version.
///
/// Snapshots are cheap to clone (`Arc` internally via the registry) and are
/// never mutated after publication. Nodes iterate in identifier order, which
/// keeps read rotation deterministic.
#[derive(Debug, Clone)]
pub struct Snapshot {
    version: u64,
    nodes: BTreeMap<String, NodeState>,
    primary: Option<String>,
    ambiguous: Option<String>,
}

impl Snapshot {
    /// Monotonic version of this snapshot.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Looks up a node by identifier.
    pub fn get(&self, node_id: &str) -> Option<&NodeState> {
        self.nodes.get(node_id)
    }

    /// Iterates nodes in identifier order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeState> {
        self.nodes.values()
    }

    /// Iterates `(id, state)` pairs in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &NodeState)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Identifier of the confirmed primary, if any.
    ///
    /// While the snapshot is ambiguous this may still name the previously
    /// confirmed primary for diagnostics, but writes are refused either way.
    pub fn primary_id(&self) -> Option<&str> {
        self.primary.as_deref()
    }

    /// State of the confirmed primary, if any.
    pub fn primary(&self) -> Option<&NodeState> {
        self.primary.as_deref().and_then(|id| self.nodes.get(id))
    }

    /// Description of the conflicting primaries, if more than one node
    /// currently claims the primary role.
    pub fn ambiguity(&self) -> Option<&str> {
        self.ambiguous.as_deref()
    }

    pub fn is_ambiguous(&self) -> bool {
        self.ambiguous.is_some()
    }
}

/// Writer-side state guarded by the registry mutex.
struct WriterState {
    version: u64,
    /// The last primary this registry confirmed. Promotion of a different
    /// node has to pass the promotion policy first.
    last_confirmed: Option<String>,
    /// Candidate awaiting confirmation: identifier and the number of
    /// consecutive cycles it has been the sole claimant.
    pending: Option<(String, u32)>,
}

/// How a recompute run treats the primary pointer.
///
/// Full recomputes come from probe cycles and may confirm a new primary.
/// Point recomputes come from single-node updates between cycles; they only
/// ever demote, and an existing ambiguity flag stays set until the next
/// full cycle observes exactly one claimant.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Recompute {
    Full,
    Point,
}

/// Single point of truth for cluster membership, roles, and health.
pub struct Registry {
    current: ArcSwap<Snapshot>,
    writer: Mutex<WriterState>,
    version_tx: watch::Sender<u64>,
    down_threshold: u32,
    promotion: PromotionPolicy,
}

impl Registry {
    /// Creates a registry seeded with the configured nodes.
    ///
    /// All nodes start with unknown role and suspect health; nothing is
    /// routable until the first probe cycle has been applied.
    pub fn new(config: &RouterConfig) -> Self {
        let nodes: BTreeMap<String, NodeState> = config
            .nodes
            .iter()
            .map(|spec| (spec.id(), NodeState::new(spec.clone())))
            .collect();
        let snapshot = Snapshot {
            version: 0,
            nodes,
            primary: None,
            ambiguous: None,
        };
        let (version_tx, _) = watch::channel(0);
        Self {
            current: ArcSwap::from_pointee(snapshot),
            writer: Mutex::new(WriterState {
                version: 0,
                last_confirmed: None,
                pending: None,
            }),
            version_tx,
            down_threshold: config.down_threshold,
            promotion: config.promotion,
        }
    }

    /// Loads the current snapshot without locking.
    pub fn current(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Returns all tracked nodes from the current snapshot.
    pub fn list_nodes(&self) -> Vec<NodeState> {
        self.current.load().nodes().cloned().collect()
    }

    /// Returns the confirmed primary from the current snapshot, or `None`
    /// when there is no confirmed primary or the cluster is ambiguous.
    pub fn current_primary(&self) -> Option<NodeState> {
        let snapshot = self.current.load();
        if snapshot.is_ambiguous() {
            return None;
        }
        snapshot.primary().cloned()
    }

    /// Subscribes to version announcements.
    ///
    /// The receiver yields the version of every snapshot published after the
    /// call. Missed intermediate versions are fine; observers reload the
    /// current snapshot on wakeup.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    /// Applies one complete probe cycle and publishes the resulting snapshot.
    ///
    /// Responsive probes reset the failure counter and record the observed
    /// role. Unresponsive probes increment the counter: the first failure
    /// marks a node suspect, reaching the configured threshold marks it down.
    /// After the per-node updates the confirmed primary is recomputed under
    /// the promotion policy.
    pub fn apply_cycle(&self, records: Vec<ProbeRecord>) -> Arc<Snapshot> {
        let mut writer = self.writer.lock().unwrap();
        let previous = self.current.load_full();
        let mut nodes = previous.nodes.clone();
        let now = Instant::now();

        for record in records {
            let Some(node) = nodes.get_mut(&record.node_id) else {
                debug!(node_id = %record.node_id, "dropping probe record for unregistered node");
                continue;
            };
            node.last_probe_at = Some(now);
            match record.outcome {
                ProbeOutcome::Responsive { role, latency_ms } => {
                    node.role = role;
                    node.health = Health::Healthy;
                    node.consecutive_failures = 0;
                    node.last_probe_ms = Some(latency_ms);
                    node.last_error = None;
                }
                ProbeOutcome::Unresponsive { reason } => {
                    node.consecutive_failures += 1;
                    node.health = if node.consecutive_failures >= self.down_threshold {
                        Health::Down
                    } else {
                        Health::Suspect
                    };
                    node.last_probe_ms = None;
                    node.last_error = Some(reason);
                }
            }
        }

        self.commit(&mut writer, &previous, nodes, Recompute::Full)
    }

    /// Applies a single-node role and health update.
    ///
    /// This is the point-update form of [`apply_cycle`](Self::apply_cycle):
    /// the node's observed state is overwritten and the confirmed primary is
    /// recomputed, including promotion accounting.
    pub fn update(&self, node_id: &str, role: Role, health: Health) -> Arc<Snapshot> {
        let mut writer = self.writer.lock().unwrap();
        let previous = self.current.load_full();
        let mut nodes = previous.nodes.clone();
        if let Some(node) = nodes.get_mut(node_id) {
            node.role = role;
            node.health = health;
            if health == Health::Healthy {
                node.consecutive_failures = 0;
                node.last_error = None;
            }
        } else {
            debug!(node_id, "dropping update for unregistered node");
        }
        self.commit(&mut writer, &previous, nodes, Recompute::Full)
    }

    /// Records an out-of-band connection failure against a node.
    ///
    /// A healthy node drops to suspect so the next probe cycle re-verifies
    /// it. The consecutive-failure counter is untouched; only probes may
    /// take a node all the way down.
    pub fn note_connection_failure(&self, node_id: &str, reason: &str) -> Arc<Snapshot> {
        let mut writer = self.writer.lock().unwrap();
        let previous = self.current.load_full();
        let mut nodes = previous.nodes.clone();
        if let Some(node) = nodes.get_mut(node_id) {
            if node.health == Health::Healthy {
                node.health = Health::Suspect;
            }
            node.last_error = Some(reason.to_string());
        } else {
            debug!(node_id, "dropping connection failure for unregistered node");
        }
        self.commit(&mut writer, &previous, nodes, Recompute::Point)
    }

    /// Marks a node operator-offline or restores it.
    ///
    /// Offline nodes keep being probed so their state stays current, but
    /// routing skips them and they cannot hold the primary pointer. The flag
    /// is never cleared automatically.
    pub fn set_offline(&self, node_id: &str, offline: bool) -> Arc<Snapshot> {
        let mut writer = self.writer.lock().unwrap();
        let previous = self.current.load_full();
        let mut nodes = previous.nodes.clone();
        if let Some(node) = nodes.get_mut(node_id) {
            if node.offline != offline {
                info!(node_id, offline, "node offline flag changed");
            }
            node.offline = offline;
        } else {
            debug!(node_id, "dropping offline change for unregistered node");
        }
        self.commit(&mut writer, &previous, nodes, Recompute::Point)
    }

    /// Rebuilds the primary pointer, publishes the snapshot, and logs
    /// transitions against the previous version.
    fn commit(
        &self,
        writer: &mut WriterState,
        previous: &Snapshot,
        nodes: BTreeMap<String, NodeState>,
        recompute: Recompute,
    ) -> Arc<Snapshot> {
        let (primary, ambiguous) = self.resolve_primary(writer, previous, &nodes, recompute);

        writer.version += 1;
        let snapshot = Arc::new(Snapshot {
            version: writer.version,
            nodes,
            primary,
            ambiguous,
        });

        self.log_transitions(previous, &snapshot);
        self.current.store(Arc::clone(&snapshot));
        self.version_tx.send_replace(snapshot.version);
        snapshot
    }

    /// Decides the primary pointer and ambiguity flag for the next snapshot.
    fn resolve_primary(
        &self,
        writer: &mut WriterState,
        previous: &Snapshot,
        nodes: &BTreeMap<String, NodeState>,
        recompute: Recompute,
    ) -> (Option<String>, Option<String>) {
        let candidates: Vec<&str> = nodes
            .iter()
            .filter(|(_, node)| node.is_primary_candidate())
            .map(|(id, _)| id.as_str())
            .collect();

        if recompute == Recompute::Point {
            // Between cycles the pointer can only be kept or dropped, and an
            // existing ambiguity flag stays until a full cycle clears it.
            let primary = previous
                .primary
                .as_deref()
                .filter(|id| candidates.contains(id))
                .map(str::to_string);
            let ambiguous = if candidates.len() > 1 {
                Some(candidates.join(", "))
            } else {
                previous.ambiguous.clone()
            };
            return (primary, ambiguous);
        }

        match candidates.as_slice() {
            [] => {
                writer.pending = None;
                (None, None)
            }
            [sole] => {
                let sole = sole.to_string();
                let continues = previous.primary.as_deref() == Some(sole.as_str())
                    && !previous.is_ambiguous();
                let reconfirmed = writer.last_confirmed.as_deref() == Some(sole.as_str());
                if continues || reconfirmed {
                    writer.pending = None;
                    writer.last_confirmed = Some(sole.clone());
                    return (Some(sole), None);
                }

                let observed = match writer.pending.take() {
                    Some((id, cycles)) if id == sole => cycles + 1,
                    _ => 1,
                };
                if writer.last_confirmed.is_none()
                    || observed >= self.promotion.required_cycles()
                {
                    writer.last_confirmed = Some(sole.clone());
                    (Some(sole), None)
                } else {
                    debug!(
                        candidate = %sole,
                        observed,
                        required = self.promotion.required_cycles(),
                        "primary candidate awaiting confirmation"
                    );
                    writer.pending = Some((sole, observed));
                    (None, None)
                }
            }
            many => {
                writer.pending = None;
                let description = many.join(", ");
                // Keep pointing at the previously confirmed primary while it
                // is among the claimants. Routing still refuses writes; the
                // pointer is for diagnostics and recovery after the split
                // resolves.
                let kept = previous
                    .primary
                    .as_deref()
                    .filter(|id| many.contains(id))
                    .map(str::to_string);
                (kept, Some(description))
            }
        }
    }

    fn log_transitions(&self, previous: &Snapshot, next: &Snapshot) {
        for (id, node) in &next.nodes {
            let before = previous.nodes.get(id);
            let old_health = before.map(|n| n.health);
            if old_health != Some(node.health) {
                match node.health {
                    Health::Down => warn!(
                        node_id = %id,
                        failures = node.consecutive_failures,
                        error = node.last_error.as_deref().unwrap_or("unknown"),
                        "node marked down"
                    ),
                    Health::Suspect => warn!(
                        node_id = %id,
                        error = node.last_error.as_deref().unwrap_or("unknown"),
                        "node suspect"
                    ),
                    Health::Healthy => info!(node_id = %id, role = ?node.role, "node healthy"),
                }
            }
            let old_role = before.map(|n| n.role);
            if old_role != Some(node.role) && node.role != Role::Unknown {
                info!(node_id = %id, from = ?old_role, to = ?node.role, "node role changed");
            }
        }

        if previous.primary != next.primary {
            info!(
                from = previous.primary.as_deref().unwrap_or("none"),
                to = next.primary.as_deref().unwrap_or("none"),
                "confirmed primary changed"
            );
        }
        if next.ambiguous.is_some() && previous.ambiguous != next.ambiguous {
            warn!(
                claimants = next.ambiguous.as_deref().unwrap_or(""),
                "multiple nodes claim the primary role"
            );
        }
        if previous.ambiguous.is_some() && next.ambiguous.is_none() {
            info!("primary ambiguity cleared");
        }
    }
}
