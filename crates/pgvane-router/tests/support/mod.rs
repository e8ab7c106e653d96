//! Shared fixtures for the router integration tests.
//!
//! `TestCluster` stands in for a replication group whose nodes can be
//! promoted, demoted, killed, and revived mid-test, with probe and connect
//! paths failing independently. Helpers build configurations with a long
//! scheduled interval so tests drive every cycle explicitly through
//! `trigger_probe` and stay deterministic.

// Shared across test binaries; not every binary uses every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pgvane_common::{Backend, NodeSpec, Result, Role, RouterConfig, Session, VaneError};
use pgvane_router::{ClusterState, Router};
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration, Instant};

// ============================================================================
// Scriptable Cluster
// ============================================================================

struct NodeScript {
    role: Role,
    probe_ok: bool,
    connect_ok: bool,
}

#[derive(Default)]
struct Inner {
    nodes: Mutex<HashMap<String, NodeScript>>,
    sessions: Mutex<HashMap<String, Vec<Arc<AtomicBool>>>>,
    probes: Mutex<HashMap<String, usize>>,
    connects: Mutex<HashMap<String, usize>>,
}

/// A fake cluster backend shared between a test and the router under test.
#[derive(Clone, Default)]
pub struct TestCluster {
    inner: Arc<Inner>,
}

impl TestCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_primary(self, id: &str) -> Self {
        self.insert(id, Role::Primary);
        self
    }

    pub fn with_replica(self, id: &str) -> Self {
        self.insert(id, Role::Replica);
        self
    }

    fn insert(&self, id: &str, role: Role) {
        self.inner.nodes.lock().unwrap().insert(
            id.to_string(),
            NodeScript {
                role,
                probe_ok: true,
                connect_ok: true,
            },
        );
    }

    /// Sets the role a node reports to probes.
    pub fn set_role(&self, id: &str, role: Role) {
        self.with_script(id, |script| script.role = role);
    }

    /// Makes `id` the sole primary, demoting every other claimant. Stands
    /// in for external failover tooling.
    pub fn promote(&self, id: &str) {
        let mut nodes = self.inner.nodes.lock().unwrap();
        for script in nodes.values_mut() {
            if script.role == Role::Primary {
                script.role = Role::Replica;
            }
        }
        nodes.get_mut(id).expect("node scripted").role = Role::Primary;
    }

    pub fn set_probe_ok(&self, id: &str, ok: bool) {
        self.with_script(id, |script| script.probe_ok = ok);
    }

    pub fn set_connect_ok(&self, id: &str, ok: bool) {
        self.with_script(id, |script| script.connect_ok = ok);
    }

    /// Takes a node off the network entirely: probes and connects both fail.
    pub fn fail_node(&self, id: &str) {
        self.with_script(id, |script| {
            script.probe_ok = false;
            script.connect_ok = false;
        });
    }

    /// Closes every session ever handed out for `id`, as a crashing server
    /// would.
    pub fn close_sessions(&self, id: &str) {
        if let Some(flags) = self.inner.sessions.lock().unwrap().get(id) {
            for flag in flags {
                flag.store(true, Ordering::Relaxed);
            }
        }
    }

    pub fn probe_count(&self, id: &str) -> usize {
        self.inner
            .probes
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn connect_count(&self, id: &str) -> usize {
        self.inner
            .connects
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    fn with_script(&self, id: &str, apply: impl FnOnce(&mut NodeScript)) {
        apply(
            self.inner
                .nodes
                .lock()
                .unwrap()
                .get_mut(id)
                .expect("node scripted"),
        );
    }

    fn bump(map: &Mutex<HashMap<String, usize>>, id: &str) {
        *map.lock().unwrap().entry(id.to_string()).or_insert(0) += 1;
    }
}

pub struct TestSession {
    closed: Arc<AtomicBool>,
}

impl Session for TestSession {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Backend for TestCluster {
    type Session = TestSession;

    async fn connect(&self, node: &NodeSpec) -> Result<TestSession> {
        let id = node.id();
        Self::bump(&self.inner.connects, &id);
        let ok = self
            .inner
            .nodes
            .lock()
            .unwrap()
            .get(&id)
            .map(|script| script.connect_ok)
            .unwrap_or(false);
        if !ok {
            return Err(VaneError::Backend {
                node: id,
                message: "connection refused".to_string(),
            });
        }
        let closed = Arc::new(AtomicBool::new(false));
        self.inner
            .sessions
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .push(Arc::clone(&closed));
        Ok(TestSession { closed })
    }

    async fn probe(&self, node: &NodeSpec) -> Result<Role> {
        let id = node.id();
        Self::bump(&self.inner.probes, &id);
        let script = self
            .inner
            .nodes
            .lock()
            .unwrap()
            .get(&id)
            .map(|script| (script.role, script.probe_ok));
        match script {
            Some((role, true)) => Ok(role),
            _ => Err(VaneError::Backend {
                node: id,
                message: "connection refused".to_string(),
            }),
        }
    }
}

// ============================================================================
// Router Fixtures
// ============================================================================

/// Configuration with a one-minute scheduled interval so only explicit
/// triggers run probe cycles.
pub fn cluster_config(nodes: &[&str]) -> RouterConfig {
    RouterConfig::new(
        nodes
            .iter()
            .map(|id| id.parse::<NodeSpec>().expect("valid node address"))
            .collect(),
    )
    .with_probe_interval(Duration::from_secs(60))
    .with_probe_timeout(Duration::from_millis(100))
    .with_pool_size(4)
    .with_acquire_timeout(Duration::from_millis(500))
}

pub async fn start_router(cluster: &TestCluster, config: RouterConfig) -> Router<TestCluster> {
    init_tracing();
    Router::start(config, cluster.clone())
        .await
        .expect("router starts")
}

/// Installs a fmt subscriber so `RUST_LOG` surfaces router logs while
/// debugging a test. Repeat calls are no-ops.
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Waiting Helpers
// ============================================================================

/// Waits until the cluster state satisfies the predicate, with a deadline.
pub async fn wait_for_state(
    rx: &mut watch::Receiver<ClusterState>,
    predicate: impl FnMut(&ClusterState) -> bool,
) -> ClusterState {
    timeout(Duration::from_secs(2), rx.wait_for(predicate))
        .await
        .expect("state change within deadline")
        .expect("state channel open")
        .clone()
}

/// Polls a condition until it holds, panicking with `what` on timeout.
pub async fn eventually(mut condition: impl FnMut() -> bool, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(10)).await;
    }
}
