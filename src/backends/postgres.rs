//! PostgreSQL driver
//!
//! Statements are already fully rendered, so they go through the simple
//! query protocol and every non-NULL column value comes back as text.

use crate::core::{
    agent::Agent,
    config::ResolvedCredentials,
    driver::Driver,
    error::{DatabaseError, Result},
    result::{is_insert_statement, RawResultSet},
    value::DatabaseValue,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};

/// Default timeout for database operations (30 seconds)
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL driver
pub struct PostgresDriver {
    client: Arc<Mutex<Option<Client>>>,
    in_transaction: Arc<Mutex<bool>>,
}

impl PostgresDriver {
    /// Create a new, unconnected PostgreSQL driver
    pub fn new() -> Self {
        Self {
            client: Arc::new(Mutex::new(None)),
            in_transaction: Arc::new(Mutex::new(false)),
        }
    }

    fn collect_messages(messages: Vec<SimpleQueryMessage>) -> RawResultSet {
        let mut raw = RawResultSet::default();
        for message in messages {
            match message {
                SimpleQueryMessage::Row(row) => {
                    if raw.columns.is_empty() {
                        raw.columns = row
                            .columns()
                            .iter()
                            .map(|c| c.name().to_string())
                            .collect();
                    }
                    let values = (0..row.len())
                        .map(|idx| {
                            row.get(idx)
                                .map(|text| DatabaseValue::String(text.to_string()))
                                .unwrap_or(DatabaseValue::Null)
                        })
                        .collect();
                    raw.rows.push(values);
                }
                SimpleQueryMessage::CommandComplete(count) => raw.affected_rows = count,
                _ => {}
            }
        }
        raw
    }

    async fn transaction_statement(&self, sql: &'static str, opening: bool) -> Result<()> {
        let mut in_transaction = self.in_transaction.lock().await;

        if opening && *in_transaction {
            return Err(DatabaseError::transaction("Already in a transaction"));
        }
        if !opening && !*in_transaction {
            return Err(DatabaseError::transaction("Not in a transaction"));
        }

        let client = self.client.lock().await;
        let client = client
            .as_ref()
            .ok_or_else(|| DatabaseError::transaction("Not connected to database"))?;

        tokio::time::timeout(DEFAULT_OPERATION_TIMEOUT, client.batch_execute(sql))
            .await
            .map_err(|_| {
                DatabaseError::transaction(format!(
                    "{} timed out after {}ms",
                    sql,
                    DEFAULT_OPERATION_TIMEOUT.as_millis()
                ))
            })?
            .map_err(|e| DatabaseError::transaction(e.to_string()))?;

        *in_transaction = opening;
        Ok(())
    }
}

/// Last id reported by an `INSERT ... RETURNING` whose first column is an integer
fn returning_id(sql: &str, raw: &RawResultSet) -> Option<u64> {
    if !is_insert_statement(sql) {
        return None;
    }
    match raw.rows.last()?.first()? {
        DatabaseValue::String(text) => text.parse().ok(),
        DatabaseValue::Long(id) => u64::try_from(*id).ok(),
        DatabaseValue::Int(id) => u64::try_from(*id).ok(),
        _ => None,
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    fn agent(&self) -> Agent {
        Agent::Postgres
    }

    async fn connect(&self, credentials: &ResolvedCredentials) -> Result<()> {
        // Clean up any existing connection first
        {
            let mut client = self.client.lock().await;
            *client = None;
        }
        {
            let mut in_transaction = self.in_transaction.lock().await;
            *in_transaction = false;
        }

        let connection_string = credentials.postgres_connection_string();
        let host = credentials.host.clone();
        let client_arc = Arc::clone(&self.client);

        let connect_future = async move {
            let (client, connection) = tokio_postgres::connect(&connection_string, NoTls)
                .await
                .map_err(|e| {
                    let state = e.code().map(|c| c.code().to_string());
                    DatabaseError::connection_with_source(&host, state, Box::new(e))
                })?;

            // The connection object drives the socket
            let log_host = host.clone();
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::error!(host = %log_host, error = %e, "PostgreSQL connection error");
                }
            });

            let mut client_guard = client_arc.lock().await;
            *client_guard = Some(client);

            Ok::<(), DatabaseError>(())
        };

        tokio::time::timeout(DEFAULT_OPERATION_TIMEOUT, connect_future)
            .await
            .map_err(|_| {
                DatabaseError::connection(
                    credentials.host.clone(),
                    format!(
                        "timed out after {}ms",
                        DEFAULT_OPERATION_TIMEOUT.as_millis()
                    ),
                )
            })??;

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client
            .try_lock()
            .map(|client| client.as_ref().is_some_and(|c| !c.is_closed()))
            .unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<()> {
        {
            let mut in_transaction = self.in_transaction.lock().await;
            *in_transaction = false;
        }

        let mut client = self.client.lock().await;
        *client = None;
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<RawResultSet> {
        let client = self.client.lock().await;
        let client = client
            .as_ref()
            .ok_or_else(|| DatabaseError::query("Not connected to database", sql))?;

        let messages = tokio::time::timeout(DEFAULT_OPERATION_TIMEOUT, client.simple_query(sql))
            .await
            .map_err(|_| {
                DatabaseError::query(
                    format!(
                        "timed out after {}ms",
                        DEFAULT_OPERATION_TIMEOUT.as_millis()
                    ),
                    sql,
                )
            })?
            .map_err(|e| DatabaseError::from_postgres(e, sql))?;

        let mut raw = Self::collect_messages(messages);
        raw.last_insert_id = returning_id(sql, &raw);
        Ok(raw)
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.transaction_statement("BEGIN", true).await
    }

    async fn commit(&self) -> Result<()> {
        self.transaction_statement("COMMIT", false).await
    }

    async fn rollback(&self) -> Result<()> {
        self.transaction_statement("ROLLBACK", false).await
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
            .try_lock()
            .map(|guard| *guard)
            .unwrap_or(false)
    }
}
