//! Serializable status report for operators and health endpoints.

use std::collections::HashMap;

use pgvane_common::{Health, Role};
use pgvane_pool::PoolStats;
use serde::{Deserialize, Serialize};

use crate::coordinator::ClusterState;
use crate::registry::Snapshot;

/// Point-in-time view of one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub role: Role,
    pub health: Health,
    pub offline: bool,
    /// Open connections, leased and idle combined.
    pub pool_size: usize,
    pub pool_idle: usize,
    pub consecutive_failures: u32,
    pub last_probe_ms: Option<u64>,
    pub last_error: Option<String>,
}

/// Point-in-time view of the whole router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterStatus {
    pub snapshot_version: u64,
    pub cluster: ClusterState,
    pub nodes: HashMap<String, NodeStatus>,
}

impl RouterStatus {
    /// Merges a registry snapshot with pool occupancy into one report.
    pub(crate) fn assemble(
        snapshot: &Snapshot,
        cluster: ClusterState,
        pools: &HashMap<String, PoolStats>,
    ) -> Self {
        let nodes = snapshot
            .iter()
            .map(|(id, node)| {
                let stats = pools.get(id).copied().unwrap_or_default();
                (
                    id.to_string(),
                    NodeStatus {
                        role: node.role,
                        health: node.health,
                        offline: node.offline,
                        pool_size: stats.open,
                        pool_idle: stats.idle,
                        consecutive_failures: node.consecutive_failures,
                        last_probe_ms: node.last_probe_ms,
                        last_error: node.last_error.clone(),
                    },
                )
            })
            .collect();
        Self {
            snapshot_version: snapshot.version(),
            cluster,
            nodes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ProbeOutcome, ProbeRecord, Registry};
    use pgvane_common::{NodeSpec, RouterConfig};

    fn sample_status() -> RouterStatus {
        let config = RouterConfig::new(vec![
            NodeSpec::new("primary", 5432),
            NodeSpec::new("replica1", 5432),
        ]);
        let registry = Registry::new(&config);
        let snapshot = registry.apply_cycle(vec![
            ProbeRecord {
                node_id: "primary:5432".to_string(),
                outcome: ProbeOutcome::Responsive {
                    role: Role::Primary,
                    latency_ms: 3,
                },
            },
            ProbeRecord {
                node_id: "replica1:5432".to_string(),
                outcome: ProbeOutcome::Unresponsive {
                    reason: "connection refused".to_string(),
                },
            },
        ]);
        let mut pools = HashMap::new();
        pools.insert("primary:5432".to_string(), PoolStats { open: 2, idle: 1 });
        pools.insert("replica1:5432".to_string(), PoolStats::default());
        RouterStatus::assemble(
            &snapshot,
            ClusterState::Stable {
                primary: "primary:5432".to_string(),
            },
            &pools,
        )
    }

    #[test]
    fn test_assemble_merges_registry_and_pools() {
        let status = sample_status();
        assert_eq!(status.snapshot_version, 1);
        assert!(status.cluster.is_stable());

        let primary = &status.nodes["primary:5432"];
        assert_eq!(primary.role, Role::Primary);
        assert_eq!(primary.health, Health::Healthy);
        assert_eq!(primary.pool_size, 2);
        assert_eq!(primary.pool_idle, 1);
        assert_eq!(primary.last_probe_ms, Some(3));

        let replica = &status.nodes["replica1:5432"];
        assert_eq!(replica.health, Health::Suspect);
        assert_eq!(replica.pool_size, 0);
        assert_eq!(replica.last_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_status_serializes_for_the_wire() {
        let status = sample_status();
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["snapshot_version"], 1);
        assert_eq!(json["cluster"]["state"], "stable");
        assert_eq!(json["cluster"]["primary"], "primary:5432");
        assert_eq!(json["nodes"]["primary:5432"]["role"], "primary");
        assert_eq!(json["nodes"]["primary:5432"]["health"], "healthy");
        assert_eq!(json["nodes"]["replica1:5432"]["health"], "suspect");
        assert_eq!(json["nodes"]["replica1:5432"]["pool_size"], 0);

        // And back, for clients that poll the report.
        let parsed: RouterStatus = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.nodes.len(), 2);
    }
}
