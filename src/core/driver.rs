//! Backend driver seam
//!
//! A [`Driver`] owns one physical connection and performs the wire-protocol
//! work. The toolkit only ever sends it fully resolved SQL text.

use super::agent::Agent;
use super::config::ResolvedCredentials;
use super::error::{DatabaseError, Result};
use super::result::RawResultSet;
use async_trait::async_trait;

/// One physical backend connection
#[async_trait]
pub trait Driver: Send + Sync {
    /// Backend family of this driver
    fn agent(&self) -> Agent;

    /// Open the physical connection
    ///
    /// An already open connection is closed first.
    async fn connect(&self, credentials: &ResolvedCredentials) -> Result<()>;

    /// Check if the physical connection is open
    fn is_connected(&self) -> bool;

    /// Close the physical connection
    async fn disconnect(&self) -> Result<()>;

    /// Run one SQL statement and return its unprocessed result
    ///
    /// `sql` is sent as-is; it must already be fully escaped.
    async fn execute(&self, sql: &str) -> Result<RawResultSet>;

    /// Begin a transaction
    async fn begin_transaction(&self) -> Result<()>;

    /// Commit the current transaction
    async fn commit(&self) -> Result<()>;

    /// Rollback the current transaction
    async fn rollback(&self) -> Result<()>;

    /// Check if a transaction is open
    fn in_transaction(&self) -> bool;
}

/// Creates drivers for a backend family
pub trait DriverFactory: Send + Sync {
    fn create(&self, agent: Agent) -> Result<Box<dyn Driver>>;
}

/// Factory for the backends compiled into this crate
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDriverFactory;

impl DriverFactory for DefaultDriverFactory {
    fn create(&self, agent: Agent) -> Result<Box<dyn Driver>> {
        match agent {
            #[cfg(feature = "sqlite")]
            Agent::Sqlite => Ok(Box::new(crate::backends::SqliteDriver::new())),
            #[cfg(feature = "postgres")]
            Agent::Postgres => Ok(Box::new(crate::backends::PostgresDriver::new())),
            #[cfg(feature = "mysql")]
            Agent::Mysql => Ok(Box::new(crate::backends::MysqlDriver::new())),
            #[allow(unreachable_patterns)]
            other => Err(DatabaseError::config(format!(
                "backend '{}' is not compiled in; enable the '{}' feature",
                other, other
            ))),
        }
    }
}

impl<F> DriverFactory for F
where
    F: Fn(Agent) -> Result<Box<dyn Driver>> + Send + Sync,
{
    fn create(&self, agent: Agent) -> Result<Box<dyn Driver>> {
        self(agent)
    }
}
