use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};
use tracing::debug;

use crate::backend::{Backend, Session};
use crate::error::{Result, VaneError};
use crate::node::{NodeSpec, Role};

pub const ENV_PG_USER: &str = "PGVANE_USER";
pub const ENV_PG_PASSWORD: &str = "PGVANE_PASSWORD";
pub const ENV_PG_DBNAME: &str = "PGVANE_DBNAME";

/// Credentials shared by every node of the cluster.
#[derive(Debug, Clone)]
pub struct PgCredentials {
    pub user: String,
    pub password: String,
    pub dbname: String,
}

impl PgCredentials {
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
        dbname: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            dbname: dbname.into(),
        }
    }

    /// Reads `PGVANE_USER`, `PGVANE_PASSWORD`, and `PGVANE_DBNAME`. User
    /// and database name default to `postgres`; the password is required.
    pub fn from_env() -> Result<Self> {
        let user = std::env::var(ENV_PG_USER).unwrap_or_else(|_| "postgres".to_string());
        let password = std::env::var(ENV_PG_PASSWORD)
            .map_err(|_| VaneError::Config(format!("{ENV_PG_PASSWORD} is not set")))?;
        let dbname = std::env::var(ENV_PG_DBNAME).unwrap_or_else(|_| "postgres".to_string());
        Ok(Self::new(user, password, dbname))
    }
}

/// PostgreSQL backend on `tokio-postgres`.
///
/// Role probes issue `SELECT pg_is_in_recovery()`: a node in recovery is a
/// streaming replica, a node not in recovery is the writable primary.
pub struct PgBackend {
    credentials: PgCredentials,
}

impl PgBackend {
    pub fn new(credentials: PgCredentials) -> Self {
        Self { credentials }
    }

    fn conn_string(&self, node: &NodeSpec) -> String {
        format!(
            "host={} port={} user={} password={} dbname={}",
            node.host, node.port, self.credentials.user, self.credentials.password,
            self.credentials.dbname
        )
    }
}

/// A live `tokio_postgres` client plus the driver task pumping its socket.
pub struct PgSession {
    client: Client,
    driver: JoinHandle<()>,
}

impl PgSession {
    /// The underlying client, for issuing queries over a leased session.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl Session for PgSession {
    fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        // The driver task runs until the connection closes; dropping the
        // session is the close.
        self.driver.abort();
    }
}

#[async_trait]
impl Backend for PgBackend {
    type Session = PgSession;

    async fn connect(&self, node: &NodeSpec) -> Result<PgSession> {
        let (client, connection) = tokio_postgres::connect(&self.conn_string(node), NoTls)
            .await
            .map_err(|err| VaneError::backend(node.id(), err))?;

        let node_id = node.id();
        let driver = tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!("connection to {} terminated: {}", node_id, err);
            }
        });

        Ok(PgSession { client, driver })
    }

    async fn probe(&self, node: &NodeSpec) -> Result<Role> {
        let session = self.connect(node).await?;
        let row = session
            .client
            .query_one("SELECT pg_is_in_recovery()", &[])
            .await
            .map_err(|err| VaneError::backend(node.id(), err))?;
        let in_recovery: bool = row
            .try_get(0)
            .map_err(|err| VaneError::backend(node.id(), err))?;
        Ok(Role::from_in_recovery(in_recovery))
    }
}
