use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

use pgvane_common::{Backend, NodeEvent, Result, RouterConfig, VaneError};

use crate::pool::{Lease, NodePool, PoolStats};

/// One bounded pool per configured node.
///
/// Every pool reports connection failures on the shared event channel so
/// the prober can mark the node suspect and reprobe without waiting for
/// the next scheduled cycle.
pub struct ConnectionManager<B: Backend> {
    pools: HashMap<String, NodePool<B>>,
}

impl<B: Backend> ConnectionManager<B> {
    pub fn new(
        config: &RouterConfig,
        backend: Arc<B>,
        events: UnboundedSender<NodeEvent>,
    ) -> Self {
        let pools: HashMap<String, NodePool<B>> = config
            .nodes
            .iter()
            .map(|node| {
                (
                    node.id(),
                    NodePool::new(
                        node.clone(),
                        Arc::clone(&backend),
                        config.pool_size,
                        config.acquire_timeout,
                        events.clone(),
                    ),
                )
            })
            .collect();

        info!(
            nodes = pools.len(),
            pool_size = config.pool_size,
            "connection manager initialized"
        );
        Self { pools }
    }

    /// Acquires a lease from the pool of `node_id`.
    ///
    /// # Errors
    ///
    /// [`VaneError::UnknownNode`] for node ids that were never configured;
    /// otherwise whatever [`NodePool::acquire`] returns.
    pub async fn acquire(&self, node_id: &str) -> Result<Lease<B>> {
        let pool = self
            .pools
            .get(node_id)
            .ok_or_else(|| VaneError::UnknownNode(node_id.to_string()))?;
        pool.acquire().await
    }

    /// Closes the idle sessions of a node that went down or was taken
    /// offline. Leased sessions keep running until released; a stale one
    /// is caught by its closed check or an invalidated lease.
    ///
    /// Returns how many idle sessions were closed.
    pub fn retire_node(&self, node_id: &str) -> Result<usize> {
        let pool = self
            .pools
            .get(node_id)
            .ok_or_else(|| VaneError::UnknownNode(node_id.to_string()))?;
        Ok(pool.drain_idle())
    }

    pub fn stats(&self) -> HashMap<String, PoolStats> {
        self.pools
            .iter()
            .map(|(id, pool)| (id.clone(), pool.stats()))
            .collect()
    }

    pub fn stats_for(&self, node_id: &str) -> Option<PoolStats> {
        self.pools.get(node_id).map(|pool| pool.stats())
    }
}
