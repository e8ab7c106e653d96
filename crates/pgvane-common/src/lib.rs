//! pgvane Shared Types and Backend Seam
//!
//! This crate provides the types shared by every pgvane component: node
//! identity and state, the error taxonomy, router configuration, and the
//! backend trait that connects the router to an actual database cluster.
//!
//! # Overview
//!
//! pgvane is a read/write-splitting connection router for PostgreSQL-style
//! clusters. The router itself lives in `pgvane-router` and the per-node
//! connection pools in `pgvane-pool`; both are generic over the [`Backend`]
//! trait defined here, so the whole system runs against a scripted cluster
//! in tests and against [`PgBackend`] in production.
//!
//! # Components
//!
//! - [`node`] - Node identity, roles, health states, and routing intents
//! - [`error`] - The `VaneError` taxonomy and `Result` alias
//! - [`config`] - `RouterConfig` with defaults, builders, and env loading
//! - [`backend`] - The `Backend`/`Session` seam
//! - [`pg`] - The production PostgreSQL backend on `tokio-postgres`
//!
//! # Example
//!
//! ```no_run
//! use pgvane_common::{NodeSpec, RouterConfig};
//!
//! let nodes = vec![
//!     NodeSpec::new("10.0.0.1", 5432),
//!     NodeSpec::new("10.0.0.2", 5432),
//! ];
//! let config = RouterConfig::new(nodes).with_pool_size(4);
//! assert!(config.validate().is_ok());
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod node;
pub mod pg;

pub use backend::{Backend, Session};
pub use config::{PromotionPolicy, RouterConfig};
pub use error::{Result, VaneError};
pub use node::{Health, Intent, NodeEvent, NodeSpec, Role};
pub use pg::{PgBackend, PgCredentials, PgSession};
