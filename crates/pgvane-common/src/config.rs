use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, VaneError};
use crate::node::NodeSpec;

pub const ENV_NODES: &str = "PGVANE_NODES";
pub const ENV_PROBE_INTERVAL_MS: &str = "PGVANE_PROBE_INTERVAL_MS";
pub const ENV_PROBE_TIMEOUT_MS: &str = "PGVANE_PROBE_TIMEOUT_MS";
pub const ENV_POOL_SIZE: &str = "PGVANE_POOL_SIZE";
pub const ENV_ACQUIRE_TIMEOUT_MS: &str = "PGVANE_ACQUIRE_TIMEOUT_MS";
pub const ENV_DOWN_THRESHOLD: &str = "PGVANE_DOWN_THRESHOLD";
pub const ENV_PROMOTION_CONFIRMATIONS: &str = "PGVANE_PROMOTION_CONFIRMATIONS";

/// How a newly observed primary becomes the confirmed primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionPolicy {
    /// Accept a sole primary on the first clean probe cycle.
    Immediate,
    /// Require the same sole primary for this many consecutive cycles
    /// before confirming it. Applies only to nodes that were not the
    /// previously confirmed primary; a known primary recovering is
    /// accepted immediately.
    Confirmed(u32),
}

impl PromotionPolicy {
    pub fn required_cycles(&self) -> u32 {
        match self {
            PromotionPolicy::Immediate => 1,
            PromotionPolicy::Confirmed(n) => (*n).max(1),
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Database endpoints the router manages.
    pub nodes: Vec<NodeSpec>,
    /// Delay between scheduled probe cycles.
    pub probe_interval: Duration,
    /// Per-node budget for a single probe (connect + role query).
    pub probe_timeout: Duration,
    /// Maximum open connections per node.
    pub pool_size: usize,
    /// How long an acquire may wait on a saturated pool.
    pub acquire_timeout: Duration,
    /// Consecutive failed probes before a suspect node is marked down.
    pub down_threshold: u32,
    pub promotion: PromotionPolicy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            probe_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
            pool_size: 10,
            acquire_timeout: Duration::from_secs(30),
            down_threshold: 2,
            promotion: PromotionPolicy::Immediate,
        }
    }
}

impl RouterConfig {
    pub fn new(nodes: Vec<NodeSpec>) -> Self {
        Self {
            nodes,
            ..Default::default()
        }
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_down_threshold(mut self, threshold: u32) -> Self {
        self.down_threshold = threshold;
        self
    }

    pub fn with_promotion(mut self, promotion: PromotionPolicy) -> Self {
        self.promotion = promotion;
        self
    }

    /// Rejects configurations the router cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(VaneError::Config("node list is empty".to_string()));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if self.nodes[..i].iter().any(|other| other == node) {
                return Err(VaneError::Config(format!("duplicate node {node}")));
            }
        }
        if self.pool_size == 0 {
            return Err(VaneError::Config("pool_size must be at least 1".to_string()));
        }
        if self.down_threshold == 0 {
            return Err(VaneError::Config(
                "down_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Loads configuration from `PGVANE_*` environment variables.
    ///
    /// `PGVANE_NODES` is required and holds a comma-separated list of
    /// `host:port` addresses; every other variable falls back to the
    /// corresponding [`Default`] field when unset.
    pub fn from_env() -> Result<Self> {
        let raw = std::env::var(ENV_NODES)
            .map_err(|_| VaneError::Config(format!("{ENV_NODES} is not set")))?;
        let nodes = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(NodeSpec::from_str)
            .collect::<Result<Vec<_>>>()?;

        let mut config = RouterConfig::new(nodes);
        if let Some(ms) = env_u64(ENV_PROBE_INTERVAL_MS)? {
            config.probe_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64(ENV_PROBE_TIMEOUT_MS)? {
            config.probe_timeout = Duration::from_millis(ms);
        }
        if let Some(size) = env_u64(ENV_POOL_SIZE)? {
            config.pool_size = size as usize;
        }
        if let Some(ms) = env_u64(ENV_ACQUIRE_TIMEOUT_MS)? {
            config.acquire_timeout = Duration::from_millis(ms);
        }
        if let Some(threshold) = env_u64(ENV_DOWN_THRESHOLD)? {
            config.down_threshold = threshold as u32;
        }
        if let Some(cycles) = env_u64(ENV_PROMOTION_CONFIRMATIONS)? {
            config.promotion = if cycles <= 1 {
                PromotionPolicy::Immediate
            } else {
                PromotionPolicy::Confirmed(cycles as u32)
            };
        }
        config.validate()?;
        Ok(config)
    }
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| VaneError::Config(format!("{name} must be an integer, got '{raw}'"))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(VaneError::Config(format!("{name}: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_nodes() -> Vec<NodeSpec> {
        vec![NodeSpec::new("db1", 5432), NodeSpec::new("db2", 5432)]
    }

    #[test]
    fn test_config_defaults() {
        let config = RouterConfig::default();
        assert_eq!(config.probe_interval, Duration::from_secs(5));
        assert_eq!(config.probe_timeout, Duration::from_secs(2));
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
        assert_eq!(config.down_threshold, 2);
        assert_eq!(config.promotion, PromotionPolicy::Immediate);
    }

    #[test]
    fn test_config_builders() {
        let config = RouterConfig::new(two_nodes())
            .with_probe_interval(Duration::from_millis(100))
            .with_probe_timeout(Duration::from_millis(50))
            .with_pool_size(2)
            .with_acquire_timeout(Duration::from_millis(200))
            .with_down_threshold(3)
            .with_promotion(PromotionPolicy::Confirmed(3));
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.probe_interval, Duration::from_millis(100));
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.down_threshold, 3);
        assert_eq!(config.promotion, PromotionPolicy::Confirmed(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_node_list() {
        let config = RouterConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_nodes() {
        let config = RouterConfig::new(vec![
            NodeSpec::new("db1", 5432),
            NodeSpec::new("db1", 5432),
        ]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_pool_and_threshold() {
        assert!(RouterConfig::new(two_nodes())
            .with_pool_size(0)
            .validate()
            .is_err());
        assert!(RouterConfig::new(two_nodes())
            .with_down_threshold(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_promotion_required_cycles() {
        assert_eq!(PromotionPolicy::Immediate.required_cycles(), 1);
        assert_eq!(PromotionPolicy::Confirmed(3).required_cycles(), 3);
        assert_eq!(PromotionPolicy::Confirmed(0).required_cycles(), 1);
    }

    // Single test for everything env-based: parallel test threads share the
    // process environment, so all mutations stay inside one test.
    #[test]
    fn test_config_from_env() {
        std::env::remove_var(ENV_NODES);
        assert!(RouterConfig::from_env().is_err());

        std::env::set_var(ENV_NODES, "db1:5432, db2:5433");
        std::env::set_var(ENV_PROBE_INTERVAL_MS, "250");
        std::env::set_var(ENV_PROBE_TIMEOUT_MS, "100");
        std::env::set_var(ENV_POOL_SIZE, "4");
        std::env::set_var(ENV_ACQUIRE_TIMEOUT_MS, "1500");
        std::env::set_var(ENV_DOWN_THRESHOLD, "3");
        std::env::set_var(ENV_PROMOTION_CONFIRMATIONS, "2");

        let config = RouterConfig::from_env().unwrap();
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[1], NodeSpec::new("db2", 5433));
        assert_eq!(config.probe_interval, Duration::from_millis(250));
        assert_eq!(config.probe_timeout, Duration::from_millis(100));
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.acquire_timeout, Duration::from_millis(1500));
        assert_eq!(config.down_threshold, 3);
        assert_eq!(config.promotion, PromotionPolicy::Confirmed(2));

        std::env::set_var(ENV_POOL_SIZE, "not-a-number");
        assert!(RouterConfig::from_env().is_err());

        for name in [
            ENV_NODES,
            ENV_PROBE_INTERVAL_MS,
            ENV_PROBE_TIMEOUT_MS,
            ENV_POOL_SIZE,
            ENV_ACQUIRE_TIMEOUT_MS,
            ENV_DOWN_THRESHOLD,
            ENV_PROMOTION_CONFIRMATIONS,
        ] {
            std::env::remove_var(name);
        }
    }
}
