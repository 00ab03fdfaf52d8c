//! SQLite driver
//!
//! rusqlite is blocking, so every call runs on tokio's blocking pool.
//! The database file is the credentials' `name` (`:memory:` for an
//! in-memory database); `host` only identifies the Link.

use crate::core::{
    agent::Agent,
    config::ResolvedCredentials,
    driver::Driver,
    error::{DatabaseError, Result},
    result::{is_insert_statement, RawResultSet},
    value::DatabaseValue,
};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Default timeout for blocking operations (30 seconds)
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// SQLite driver
pub struct SqliteDriver {
    connection: Arc<Mutex<Option<Connection>>>,
    in_transaction: Arc<Mutex<bool>>,
}

impl SqliteDriver {
    /// Create a new, unconnected SQLite driver
    pub fn new() -> Self {
        Self {
            connection: Arc::new(Mutex::new(None)),
            in_transaction: Arc::new(Mutex::new(false)),
        }
    }

    fn value_from_ref(value: ValueRef<'_>) -> DatabaseValue {
        match value {
            ValueRef::Null => DatabaseValue::Null,
            ValueRef::Integer(v) => DatabaseValue::Long(v),
            ValueRef::Real(v) => DatabaseValue::Double(v),
            ValueRef::Text(v) => DatabaseValue::String(String::from_utf8_lossy(v).to_string()),
            ValueRef::Blob(v) => DatabaseValue::Bytes(v.to_vec()),
        }
    }

    fn run_statement(conn: &Connection, sql: &str) -> Result<RawResultSet> {
        let fail = |e| DatabaseError::from_sqlite(e, sql);

        let mut stmt = conn.prepare(sql).map_err(fail)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        if columns.is_empty() {
            let affected = stmt.execute([]).map_err(fail)?;
            let last_insert_id = if is_insert_statement(sql) {
                u64::try_from(conn.last_insert_rowid()).ok()
            } else {
                None
            };
            return Ok(RawResultSet {
                columns,
                rows: Vec::new(),
                affected_rows: affected as u64,
                last_insert_id,
            });
        }

        let readonly = stmt.readonly();
        let mut rows = Vec::new();
        let mut cursor = stmt.query([]).map_err(fail)?;
        while let Some(row) = cursor.next().map_err(fail)? {
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                values.push(Self::value_from_ref(row.get_ref(idx).map_err(fail)?));
            }
            rows.push(values);
        }

        let affected_rows = if readonly { 0 } else { conn.changes() as u64 };
        Ok(RawResultSet {
            columns,
            rows,
            affected_rows,
            last_insert_id: None,
        })
    }

    /// Run `op` on the blocking pool, aborting it after the default timeout
    async fn run_blocking<T, F>(op: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut task = tokio::task::spawn_blocking(op);

        // Use select! to abort task on timeout, preventing resource leaks
        tokio::select! {
            result = &mut task => {
                result.map_err(|e| DatabaseError::other(format!("Task join error: {}", e)))?
            }
            _ = tokio::time::sleep(DEFAULT_OPERATION_TIMEOUT) => {
                task.abort();
                Err(DatabaseError::other(format!(
                    "SQLite operation timed out after {}ms",
                    DEFAULT_OPERATION_TIMEOUT.as_millis()
                )))
            }
        }
    }

    async fn transaction_statement(&self, sql: &'static str, opening: bool) -> Result<()> {
        let connection_arc = Arc::clone(&self.connection);
        let in_transaction_arc = Arc::clone(&self.in_transaction);

        Self::run_blocking(move || -> Result<()> {
            // Acquire both locks to prevent races between statement and flag
            let mut in_transaction = in_transaction_arc.blocking_lock();
            let connection = connection_arc.blocking_lock();
            let conn = connection
                .as_ref()
                .ok_or_else(|| DatabaseError::transaction("Not connected to database"))?;

            if opening && *in_transaction {
                return Err(DatabaseError::transaction("Already in a transaction"));
            }
            if !opening && !*in_transaction {
                return Err(DatabaseError::transaction("Not in a transaction"));
            }

            // Execute SQL first, only flip the flag on success
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::transaction(e.to_string()))?;
            *in_transaction = opening;
            Ok(())
        })
        .await
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn agent(&self) -> Agent {
        Agent::Sqlite
    }

    async fn connect(&self, credentials: &ResolvedCredentials) -> Result<()> {
        {
            let mut connection = self.connection.lock().await;
            *connection = None;
        }
        {
            let mut in_transaction = self.in_transaction.lock().await;
            *in_transaction = false;
        }

        let path = credentials.name.clone();
        let host = credentials.host.clone();
        let connection_arc = Arc::clone(&self.connection);

        Self::run_blocking(move || -> Result<()> {
            let conn = Connection::open(&path)
                .map_err(|e| DatabaseError::connection_with_source(&host, None, Box::new(e)))?;

            conn.execute_batch("PRAGMA foreign_keys = ON")
                .map_err(|e| DatabaseError::connection_with_source(&host, None, Box::new(e)))?;

            let mut connection = connection_arc.blocking_lock();
            *connection = Some(conn);
            Ok(())
        })
        .await
    }

    fn is_connected(&self) -> bool {
        self.connection
            .try_lock()
            .map(|conn| conn.is_some())
            .unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<()> {
        {
            let mut in_transaction = self.in_transaction.lock().await;
            *in_transaction = false;
        }

        let mut connection = self.connection.lock().await;
        *connection = None;
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<RawResultSet> {
        let sql = sql.to_string();
        let connection_arc = Arc::clone(&self.connection);

        Self::run_blocking(move || -> Result<RawResultSet> {
            let connection = connection_arc.blocking_lock();
            let conn = connection
                .as_ref()
                .ok_or_else(|| DatabaseError::query("Not connected to database", sql.as_str()))?;
            Self::run_statement(conn, &sql)
        })
        .await
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.transaction_statement("BEGIN TRANSACTION", true).await
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

impl Drop for SqliteDriver {
    fn drop(&mut self) {
        // Best-effort rollback, Drop cannot be async
        if let Ok(in_trans) = self.in_transaction.try_lock() {
            if *in_trans {
                if let Ok(connection) = self.connection.try_lock() {
                    if let Some(conn) = connection.as_ref() {
                        let _ = conn.execute_batch("ROLLBACK");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> ResolvedCredentials {
        ResolvedCredentials {
            host: "local".to_string(),
            port: None,
            name: ":memory:".to_string(),
            username: "app".to_string(),
            password: String::new(),
            charset: None,
            timezone: None,
        }
    }

    #[tokio::test]
    async fn test_sqlite_connect() {
        let driver = SqliteDriver::new();
        assert!(driver.connect(&memory()).await.is_ok());
        assert!(driver.is_connected());
        assert!(driver.disconnect().await.is_ok());
        assert!(!driver.is_connected());
    }

    #[tokio::test]
    async fn test_sqlite_execute() -> Result<()> {
        let driver = SqliteDriver::new();
        driver.connect(&memory()).await?;

        driver
            .execute("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .await?;

        let raw = driver
            .execute("INSERT INTO test (name) VALUES ('Alice'), ('Bob')")
            .await?;
        assert_eq!(raw.affected_rows, 2);
        assert_eq!(raw.last_insert_id, Some(2));

        let raw = driver.execute("SELECT id, name FROM test ORDER BY id").await?;
        assert_eq!(raw.columns, vec!["id".to_string(), "name".to_string()]);
        assert_eq!(raw.rows.len(), 2);
        assert_eq!(raw.rows[1][1], DatabaseValue::String("Bob".to_string()));
        assert_eq!(raw.affected_rows, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_query_error_carries_statement() {
        let driver = SqliteDriver::new();
        driver.connect(&memory()).await.unwrap();

        let err = driver.execute("SELECT * FROM missing").await.unwrap_err();
        assert!(matches!(err, DatabaseError::Query { .. }));
        assert_eq!(err.query_text(), Some("SELECT * FROM missing"));
    }

    #[tokio::test]
    async fn test_sqlite_transaction() -> Result<()> {
        let driver = SqliteDriver::new();
        driver.connect(&memory()).await?;
        driver
            .execute("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .await?;

        driver.begin_transaction().await?;
        assert!(driver.in_transaction());
        assert!(driver.begin_transaction().await.is_err());
        driver.execute("INSERT INTO test (name) VALUES ('Alice')").await?;
        driver.rollback().await?;
        assert!(!driver.in_transaction());

        let raw = driver.execute("SELECT * FROM test").await?;
        assert!(raw.rows.is_empty());
        assert!(driver.commit().await.is_err());
        Ok(())
    }
}
