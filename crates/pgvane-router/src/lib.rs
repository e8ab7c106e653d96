//! # pgvane-router
//!
//! Read/write-splitting connection router with primary-liveness
//! verification and failover-aware connection management for replicated
//! PostgreSQL clusters.
//!
//! ## Overview
//!
//! A [`Router`] tracks a fixed set of nodes, probes them in the background
//! to learn which one is the primary, and routes each request by intent:
//! writes go only to the confirmed primary, reads rotate over healthy
//! nodes with replicas first. Connections are leased from one bounded pool
//! per node and returned automatically when the lease drops. When the
//! primary disappears the cluster degrades, writes fail fast with typed
//! errors, reads keep flowing, and the router follows the promotion that
//! external failover tooling performs.
//!
//! ## Components
//!
//! - [`registry`] - versioned, copy-on-write snapshots of node roles and
//!   health, including primary confirmation
//! - [`prober`] - background liveness probing on an interval and on demand
//! - [`policy`] - write-to-primary and replica-first read selection
//! - [`coordinator`] - stable/degraded classification, forced reprobes,
//!   and pool cleanup
//! - [`status`] - serializable reports for observability endpoints
//! - [`router`] - the facade tying the pieces together
//!
//! ## Example
//!
//! ```no_run
//! use pgvane_common::{Intent, PgBackend, PgCredentials, RouterConfig};
//! use pgvane_router::Router;
//!
//! # async fn run() -> pgvane_common::Result<()> {
//! let config = RouterConfig::from_env()?;
//! let backend = PgBackend::new(PgCredentials::from_env()?);
//! let router = Router::start(config, backend).await?;
//!
//! let lease = match router.checkout(Intent::Read).await {
//!     Ok(lease) => lease,
//!     // A node that fails at connect time is reported suspect, so routing
//!     // again immediately picks the next healthy node.
//!     Err(err) if err.is_connection_failure() => router.checkout(Intent::Read).await?,
//!     Err(err) => return Err(err),
//! };
//! let rows = lease.client().query("SELECT now()", &[]).await?;
//! println!("{} row(s), served by {}", rows.len(), lease.node_id());
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod policy;
pub mod prober;
pub mod registry;
pub mod router;
pub mod status;

#[cfg(test)]
pub(crate) mod testkit;

pub use coordinator::{ClusterState, FailoverCoordinator};
pub use policy::{RoutingDecision, RoutingPolicy};
pub use prober::LivenessProber;
pub use registry::{NodeState, ProbeOutcome, ProbeRecord, Registry, Snapshot};
pub use router::Router;
pub use status::{NodeStatus, RouterStatus};
