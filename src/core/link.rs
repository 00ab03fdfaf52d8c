//! One physical connection and everything needed to talk to it
//!
//! A [`Link`] pairs a [`Driver`] with the escaper, preparer and result
//! processor of its backend. Every call is awaited to completion before the
//! next one can be issued on the same Link.

use super::agent::Agent;
use super::batch::Batch;
use super::config::{DatabaseConfig, ErrorHandler, ResolvedCredentials};
use super::driver::Driver;
use super::error::{DatabaseError, Result};
use super::escaper::Escaper;
use super::params::Params;
use super::preparer::Preparer;
use super::query_builder::QueryBuilder;
use super::result::{FetchType, QueryResult, ResultProcessor};
use super::value::DatabaseValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Logical role of a Link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sharding disabled: the only connection
    Single,
    /// Primary of a sharded topology
    Master,
    /// Replica of a sharded topology
    Slave,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Single => "single",
            Role::Master => "master",
            Role::Slave => "slave",
        }
    }

    /// Parse a role token; anything else is treated as a host name by callers
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "single" => Some(Role::Single),
            "master" => Some(Role::Master),
            "slave" => Some(Role::Slave),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection state of a Link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connected,
}

/// A physical backend connection tagged with its role
pub struct Link {
    role: Role,
    credentials: ResolvedCredentials,
    driver: Box<dyn Driver>,
    preparer: Preparer,
    processor: ResultProcessor,
    error_handler: Option<ErrorHandler>,
    open: AtomicBool,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("role", &self.role)
            .field("host", &self.credentials.host)
            .field("agent", &self.agent())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Link {
    /// Create an unopened Link; the escaping rules follow the driver's backend
    pub fn new(
        role: Role,
        credentials: ResolvedCredentials,
        driver: Box<dyn Driver>,
        config: &DatabaseConfig,
    ) -> Self {
        let escaper = Escaper::new(driver.agent());
        Self {
            role,
            credentials,
            driver,
            preparer: Preparer::new(escaper),
            processor: ResultProcessor::new(
                config.fetch_type,
                config.fetch_limit,
                config.contiguous_insert_ids,
            ),
            error_handler: config.query_error_handler.clone(),
            open: AtomicBool::new(false),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Host this Link is cached under
    pub fn host(&self) -> &str {
        &self.credentials.host
    }

    pub fn credentials(&self) -> &ResolvedCredentials {
        &self.credentials
    }

    pub fn agent(&self) -> Agent {
        self.driver.agent()
    }

    pub fn escaper(&self) -> Escaper {
        *self.preparer.escaper()
    }

    pub fn preparer(&self) -> Preparer {
        self.preparer
    }

    pub fn status(&self) -> LinkStatus {
        if self.is_connected() {
            LinkStatus::Connected
        } else {
            LinkStatus::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Open the physical connection
    pub async fn open(&self) -> Result<()> {
        self.driver.connect(&self.credentials).await?;
        self.open.store(true, Ordering::Release);
        tracing::info!(host = %self.host(), role = %self.role, agent = %self.agent(), "connected");
        Ok(())
    }

    /// Close the physical connection
    pub async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::Release);
        self.driver.disconnect().await?;
        tracing::info!(host = %self.host(), role = %self.role, "disconnected");
        Ok(())
    }

    /// Render a value as a literal for this backend
    pub fn escape(&self, value: impl Into<DatabaseValue>) -> Result<String> {
        self.escaper().escape_value(&value.into(), None)
    }

    pub fn escape_identifier(&self, identifier: &str) -> String {
        self.escaper().escape_identifier(identifier)
    }

    /// Resolve a statement template without running it
    pub fn prepare(&self, template: &str, params: &Params) -> Result<String> {
        self.preparer.prepare(template, params)
    }

    /// Resolve and run a statement template
    pub async fn query(&self, template: &str, params: impl Into<Params>) -> Result<QueryResult> {
        self.query_with(template, params, None, None).await
    }

    /// Resolve and run a statement template with an explicit fetch limit and row shape
    ///
    /// A configured error handler receives any preparer or backend failure
    /// along with the template and params; its return value is handed back
    /// instead of the error.
    pub async fn query_with(
        &self,
        template: &str,
        params: impl Into<Params>,
        limit: Option<usize>,
        fetch_type: Option<FetchType>,
    ) -> Result<QueryResult> {
        let params = params.into();
        let outcome = match self.preparer.prepare(template, &params) {
            Ok(sql) => self.run(&sql, limit, fetch_type).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(result) => Ok(result),
            Err(e) => self.handle_error(e, template, &params),
        }
    }

    /// Run an already rendered statement
    ///
    /// The statement is not scanned for placeholders. Failures still go to
    /// the configured error handler.
    pub async fn execute_raw(&self, sql: &str) -> Result<QueryResult> {
        match self.run(sql, None, None).await {
            Ok(result) => Ok(result),
            Err(e) => self.handle_error(e, sql, &Params::new()),
        }
    }

    /// Run an already rendered statement, bypassing the error handler
    pub(crate) async fn execute_unhandled(&self, sql: &str) -> Result<QueryResult> {
        self.run(sql, None, None).await
    }

    async fn run(
        &self,
        sql: &str,
        limit: Option<usize>,
        fetch_type: Option<FetchType>,
    ) -> Result<QueryResult> {
        let started = Instant::now();
        let raw = self.driver.execute(sql).await?;
        let mut result = self.processor.process(raw, limit, fetch_type);
        result.query = sql.to_string();
        result.elapsed = started.elapsed();

        tracing::debug!(
            host = %self.host(),
            elapsed = ?result.elapsed,
            rows = result.row_count,
            affected = result.rows_affected,
            "{}",
            sql
        );
        Ok(result)
    }

    fn handle_error(&self, error: DatabaseError, query: &str, params: &Params) -> Result<QueryResult> {
        match &self.error_handler {
            Some(handler) => {
                tracing::warn!(host = %self.host(), error = %error, "query failed, using error handler result");
                handler(&error, query, params)
            }
            None => Err(error),
        }
    }

    /// Query builder bound to this Link's backend
    pub fn builder(&self, table: &str) -> QueryBuilder {
        QueryBuilder::new(self.escaper()).table(table)
    }

    /// Empty statement batch on this Link
    pub fn batch(&self) -> Batch<'_> {
        Batch::new(self)
    }

    pub async fn begin(&self) -> Result<()> {
        self.driver.begin_transaction().await?;
        tracing::debug!(host = %self.host(), "transaction started");
        Ok(())
    }

    pub async fn commit(&self) -> Result<()> {
        self.driver.commit().await?;
        tracing::debug!(host = %self.host(), "transaction committed");
        Ok(())
    }

    pub async fn rollback(&self) -> Result<()> {
        self.driver.rollback().await?;
        tracing::warn!(host = %self.host(), "transaction rolled back");
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.driver.in_transaction()
    }
}
