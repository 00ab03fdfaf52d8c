//! Database facade
//!
//! [`Database`] is the entry point most applications need: it owns a
//! [`Linker`] and forwards host-routed calls to the right [`Link`].
//!
//! ```ignore
//! let db = Database::new(DatabaseConfig::from_json_file("db.json")?)?;
//! let users = db.query(Some("slave"), "SELECT * FROM users WHERE id = ?", params![5]).await?;
//!
//! let master = db.link(None).await?;
//! let inserted = master.builder("users").insert_row(record).run(&master).await?;
//! ```

use super::config::DatabaseConfig;
use super::driver::DriverFactory;
use super::error::Result;
use super::link::Link;
use super::linker::Linker;
use super::params::Params;
use super::query_builder::QueryBuilder;
use super::result::QueryResult;
use std::sync::Arc;

/// Host-routed access to a configured set of databases
#[derive(Debug)]
pub struct Database {
    linker: Linker,
}

impl Database {
    /// Validate `config` and route through the compiled-in backends
    ///
    /// No connection is opened until the first call that needs one.
    pub fn new(config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            linker: Linker::new(config),
        })
    }

    /// Validate `config` and create drivers through `factory`
    pub fn with_factory(config: DatabaseConfig, factory: impl DriverFactory + 'static) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            linker: Linker::with_factory(config, factory),
        })
    }

    pub fn linker(&self) -> &Linker {
        &self.linker
    }

    pub fn config(&self) -> &DatabaseConfig {
        self.linker.config()
    }

    /// Connected Link for `host` (see [`Linker::connect`])
    pub async fn link(&self, host: Option<&str>) -> Result<Arc<Link>> {
        self.linker.connect(host).await
    }

    /// Resolve and run a statement template on `host`
    pub async fn query(
        &self,
        host: Option<&str>,
        template: &str,
        params: impl Into<Params>,
    ) -> Result<QueryResult> {
        let link = self.linker.connect(host).await?;
        link.query(template, params).await
    }

    /// Query builder rendering for the backend behind `host`
    ///
    /// Connects so the builder uses that Link's escaping rules.
    pub async fn builder(&self, host: Option<&str>, table: &str) -> Result<QueryBuilder> {
        let link = self.linker.connect(host).await?;
        Ok(link.builder(table))
    }

    /// Close Links (see [`Linker::disconnect`])
    pub async fn disconnect(&self, host: Option<&str>) -> Result<usize> {
        self.linker.disconnect(host).await
    }
}
