use async_trait::async_trait;

use crate::error::Result;
use crate::node::{NodeSpec, Role};

/// An open connection to a single node.
pub trait Session: Send + 'static {
    /// True once the underlying connection is no longer usable. Pooled
    /// sessions are checked before being handed out again.
    fn is_closed(&self) -> bool;
}

/// Driver seam between the router and an actual database cluster.
///
/// The production implementation is [`crate::pg::PgBackend`]; integration
/// tests substitute a scripted in-memory cluster so routing, pooling, and
/// failover can be exercised without a running database.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    type Session: Session;

    /// Opens a new session against `node`.
    async fn connect(&self, node: &NodeSpec) -> Result<Self::Session>;

    /// Asks `node` for its current replication role. Implementations keep
    /// this cheap; callers bound it with the configured probe timeout.
    async fn probe(&self, node: &NodeSpec) -> Result<Role>;
}
