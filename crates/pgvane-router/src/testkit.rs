//! Scriptable cluster fake shared by the unit tests in this crate.
//!
//! `FakeCluster` plays the part of a small replication group: each node has
//! a scripted role, a reachability switch, and an optional probe delay, all
//! adjustable while a test runs. Cloning shares the script, so a test can
//! keep a handle while the prober owns another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pgvane_common::{Backend, NodeSpec, Result, Role, Session, VaneError};
use tokio::time::Duration;

struct NodeScript {
    role: Role,
    reachable: bool,
    probe_delay: Duration,
}

#[derive(Default)]
struct Inner {
    nodes: Mutex<HashMap<String, NodeScript>>,
    probes: Mutex<HashMap<String, usize>>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeCluster {
    inner: Arc<Inner>,
}

impl FakeCluster {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_primary(self, id: &str) -> Self {
        self.insert(id, Role::Primary);
        self
    }

    pub(crate) fn with_replica(self, id: &str) -> Self {
        self.insert(id, Role::Replica);
        self
    }

    fn insert(&self, id: &str, role: Role) {
        self.inner.nodes.lock().unwrap().insert(
            id.to_string(),
            NodeScript {
                role,
                reachable: true,
                probe_delay: Duration::ZERO,
            },
        );
    }

    pub(crate) fn set_reachable(&self, id: &str, reachable: bool) {
        self.inner
            .nodes
            .lock()
            .unwrap()
            .get_mut(id)
            .expect("node scripted")
            .reachable = reachable;
    }

    pub(crate) fn set_probe_delay(&self, id: &str, delay: Duration) {
        self.inner
            .nodes
            .lock()
            .unwrap()
            .get_mut(id)
            .expect("node scripted")
            .probe_delay = delay;
    }

    /// Makes `id` the sole primary, demoting any node currently holding
    /// the role. Stands in for external failover tooling.
    pub(crate) fn promote(&self, id: &str) {
        let mut nodes = self.inner.nodes.lock().unwrap();
        for script in nodes.values_mut() {
            if script.role == Role::Primary {
                script.role = Role::Replica;
            }
        }
        nodes.get_mut(id).expect("node scripted").role = Role::Primary;
    }

    pub(crate) fn probe_count(&self, id: &str) -> usize {
        self.inner
            .probes
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    fn script_of(&self, id: &str) -> Option<(Role, bool, Duration)> {
        self.inner
            .nodes
            .lock()
            .unwrap()
            .get(id)
            .map(|script| (script.role, script.reachable, script.probe_delay))
    }
}

pub(crate) struct FakeSession;

impl Session for FakeSession {
    fn is_closed(&self) -> bool {
        false
    }
}

#[async_trait]
impl Backend for FakeCluster {
    type Session = FakeSession;

    async fn connect(&self, node: &NodeSpec) -> Result<FakeSession> {
        let id = node.id();
        match self.script_of(&id) {
            Some((_, true, _)) => Ok(FakeSession),
            _ => Err(VaneError::Backend {
                node: id,
                message: "connection refused".to_string(),
            }),
        }
    }

    async fn probe(&self, node: &NodeSpec) -> Result<Role> {
        let id = node.id();
        *self
            .inner
            .probes
            .lock()
            .unwrap()
            .entry(id.clone())
            .or_insert(0) += 1;

        let Some((role, reachable, delay)) = self.script_of(&id) else {
            return Err(VaneError::Backend {
                node: id,
                message: "unknown node".to_string(),
            });
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !reachable {
            return Err(VaneError::Backend {
                node: id,
                message: "connection refused".to_string(),
            });
        }
        Ok(role)
    }
}
