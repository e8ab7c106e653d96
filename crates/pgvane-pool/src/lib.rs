pub mod manager;
pub mod pool;

pub use manager::ConnectionManager;
pub use pool::{Lease, NodePool, PoolStats};
