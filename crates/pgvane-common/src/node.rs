use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::VaneError;

/// A configured database endpoint. The `"host:port"` rendering is the node's
/// identity everywhere else in the system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeSpec {
    pub host: String,
    pub port: u16,
}

impl NodeSpec {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeSpec {
    type Err = VaneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| VaneError::Config(format!("invalid node address '{s}', expected host:port")))?;
        if host.is_empty() {
            return Err(VaneError::Config(format!("invalid node address '{s}', empty host")));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| VaneError::Config(format!("invalid port in node address '{s}'")))?;
        Ok(NodeSpec::new(host, port))
    }
}

/// Replication role of a node as last observed by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Not probed yet, or the last probe failed before a role was read.
    Unknown,
    Primary,
    Replica,
}

impl Role {
    /// Map the `pg_is_in_recovery()` answer to a role: a node in recovery
    /// is streaming from a primary, a node not in recovery accepts writes.
    pub fn from_in_recovery(in_recovery: bool) -> Self {
        if in_recovery {
            Role::Replica
        } else {
            Role::Primary
        }
    }
}

/// Health of a node as tracked by the prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    /// At least one recent probe failed; excluded from routing until a
    /// probe succeeds again.
    Suspect,
    /// Consecutive failures reached the configured threshold.
    Down,
}

/// What the caller intends to do with the connection it is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Read,
    Write,
}

/// Out-of-band signal from the connection layer to the prober, sent the
/// moment a network-level failure is seen instead of waiting for the next
/// scheduled probe cycle.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    ConnectionFailed { node_id: String, reason: String },
}
