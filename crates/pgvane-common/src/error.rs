use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaneError {
    #[error("no primary available")]
    NoPrimaryAvailable,

    #[error("ambiguous primary: {0}")]
    AmbiguousPrimary(String),

    #[error("no healthy node available for reads")]
    NoNodeAvailable,

    #[error("acquire timed out after {0}ms on node {1}")]
    AcquireTimeout(u64, String),

    #[error("node down: {0}")]
    NodeDown(String),

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("backend error on {node}: {message}")]
    Backend { node: String, message: String },

    /// Driver-level failure with no node context, typically raised while a
    /// caller uses a leased connection.
    #[error("database driver error: {0}")]
    Driver(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaneError {
    /// Build a backend error from any driver-level failure.
    pub fn backend(node: impl Into<String>, err: impl std::fmt::Display) -> Self {
        VaneError::Backend {
            node: node.into(),
            message: err.to_string(),
        }
    }

    /// True for failures that indicate the node itself is unreachable or
    /// broken, as opposed to caller mistakes like an unknown node id.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            VaneError::Backend { .. }
                | VaneError::NodeDown(_)
                | VaneError::Driver(_)
                | VaneError::Io(_)
        )
    }
}

impl From<tokio_postgres::Error> for VaneError {
    fn from(err: tokio_postgres::Error) -> Self {
        VaneError::Driver(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VaneError>;
