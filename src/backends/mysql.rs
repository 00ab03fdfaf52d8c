//! MySQL driver built on mysql_async

use crate::core::{
    agent::Agent,
    config::{check_charset, ResolvedCredentials},
    driver::Driver,
    error::{DatabaseError, Result},
    result::{is_insert_statement, RawResultSet},
    value::DatabaseValue,
};
use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder, Row, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Default timeout for database operations (30 seconds)
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// MySQL driver
pub struct MysqlDriver {
    conn: Arc<Mutex<Option<Conn>>>,
    in_transaction: Arc<Mutex<bool>>,
}

impl MysqlDriver {
    /// Create a new, unconnected MySQL driver
    pub fn new() -> Self {
        Self {
            conn: Arc::new(Mutex::new(None)),
            in_transaction: Arc::new(Mutex::new(false)),
        }
    }

    fn options(credentials: &ResolvedCredentials) -> Result<OptsBuilder> {
        let mut init = Vec::new();
        if let Some(charset) = &credentials.charset {
            check_charset(charset)?;
            init.push(format!("SET NAMES {}", charset));
        }
        if let Some(timezone) = &credentials.timezone {
            init.push(format!("SET time_zone = '{}'", timezone.replace('\'', "''")));
        }

        Ok(OptsBuilder::default()
            .ip_or_hostname(credentials.host.clone())
            .tcp_port(
                credentials
                    .port
                    .or(Agent::Mysql.default_port())
                    .unwrap_or(3306),
            )
            .user(Some(credentials.username.clone()))
            .pass(Some(credentials.password.clone()))
            .db_name(Some(credentials.name.clone()))
            .init(init))
    }

    fn convert_value(value: Value) -> DatabaseValue {
        match value {
            Value::NULL => DatabaseValue::Null,
            Value::Bytes(bytes) => match String::from_utf8(bytes) {
                Ok(text) => DatabaseValue::String(text),
                Err(e) => DatabaseValue::Bytes(e.into_bytes()),
            },
            Value::Int(v) => DatabaseValue::Long(v),
            Value::UInt(v) => i64::try_from(v)
                .map(DatabaseValue::Long)
                .unwrap_or_else(|_| DatabaseValue::String(v.to_string())),
            Value::Float(v) => DatabaseValue::Float(v),
            Value::Double(v) => DatabaseValue::Double(v),
            Value::Date(year, month, day, hour, minute, second, micros) => {
                let mut text = format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, minute, second
                );
                if micros > 0 {
                    text.push_str(&format!(".{:06}", micros));
                }
                DatabaseValue::String(text)
            }
            Value::Time(negative, days, hours, minutes, seconds, micros) => {
                let total_hours = days * 24 + u32::from(hours);
                let mut text = format!(
                    "{}{:02}:{:02}:{:02}",
                    if negative { "-" } else { "" },
                    total_hours,
                    minutes,
                    seconds
                );
                if micros > 0 {
                    text.push_str(&format!(".{:06}", micros));
                }
                DatabaseValue::String(text)
            }
        }
    }

    fn timeout_error(sql: &str) -> DatabaseError {
        DatabaseError::query(
            format!(
                "timed out after {}ms",
                DEFAULT_OPERATION_TIMEOUT.as_millis()
            ),
            sql,
        )
    }

    async fn run(conn: &mut Conn, sql: &str) -> Result<RawResultSet> {
        let fail = |e| DatabaseError::from_mysql(e, sql);

        let mut result = conn.query_iter(sql).await.map_err(fail)?;
        let columns: Vec<String> = result
            .columns()
            .map(|cols| cols.iter().map(|c| c.name_str().into_owned()).collect())
            .unwrap_or_default();
        let rows: Vec<Row> = result.collect().await.map_err(fail)?;
        let affected_rows = result.affected_rows();
        // MySQL reports the first id of a multi-row insert
        let last_insert_id = result
            .last_insert_id()
            .filter(|id| *id > 0 && is_insert_statement(sql))
            .map(|first| first + affected_rows.saturating_sub(1));
        // Any further result sets are discarded
        result.drop_result().await.map_err(fail)?;

        Ok(RawResultSet {
            columns,
            rows: rows
                .into_iter()
                .map(|row| row.unwrap().into_iter().map(Self::convert_value).collect())
                .collect(),
            affected_rows,
            last_insert_id,
        })
    }

    async fn transaction_statement(&self, sql: &'static str, opening: bool) -> Result<()> {
        let mut in_transaction = self.in_transaction.lock().await;

        if opening && *in_transaction {
            return Err(DatabaseError::transaction("Already in a transaction"));
        }
        if !opening && !*in_transaction {
            return Err(DatabaseError::transaction("Not in a transaction"));
        }

        let mut conn = self.conn.lock().await;
        let conn = conn
            .as_mut()
            .ok_or_else(|| DatabaseError::transaction("Not connected to database"))?;

        tokio::time::timeout(DEFAULT_OPERATION_TIMEOUT, conn.query_drop(sql))
            .await
            .map_err(|_| Self::timeout_error(sql))?
            .map_err(|e| DatabaseError::transaction(e.to_string()))?;

        *in_transaction = opening;
        Ok(())
    }
}

impl Default for MysqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for MysqlDriver {
    fn agent(&self) -> Agent {
        Agent::Mysql
    }

    async fn connect(&self, credentials: &ResolvedCredentials) -> Result<()> {
        self.disconnect().await?;

        let opts = Self::options(credentials)?;
        let conn = tokio::time::timeout(DEFAULT_OPERATION_TIMEOUT, Conn::new(opts))
            .await
            .map_err(|_| {
                DatabaseError::connection(
                    credentials.host.clone(),
                    format!(
                        "timed out after {}ms",
                        DEFAULT_OPERATION_TIMEOUT.as_millis()
                    ),
                )
            })?
            .map_err(|e| {
                let state = match &e {
                    mysql_async::Error::Server(server) => Some(server.state.clone()),
                    _ => None,
                };
                DatabaseError::connection_with_source(credentials.host.clone(), state, Box::new(e))
            })?;

        let mut guard = self.conn.lock().await;
        *guard = Some(conn);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn
            .try_lock()
            .map(|conn| conn.is_some())
            .unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<()> {
        {
            let mut in_transaction = self.in_transaction.lock().await;
            *in_transaction = false;
        }

        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            // The server may already have dropped us, nothing left to close then
            if let Err(e) = conn.disconnect().await {
                tracing::debug!(error = %e, "MySQL disconnect failed");
            }
        }
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<RawResultSet> {
        let mut conn = self.conn.lock().await;
        let conn = conn
            .as_mut()
            .ok_or_else(|| DatabaseError::query("Not connected to database", sql))?;

        tokio::time::timeout(DEFAULT_OPERATION_TIMEOUT, Self::run(conn, sql))
            .await
            .map_err(|_| Self::timeout_error(sql))?
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.transaction_statement("START TRANSACTION", true).await
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

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(charset: &str) -> ResolvedCredentials {
        ResolvedCredentials {
            host: "localhost".to_string(),
            port: None,
            name: "app".to_string(),
            username: "app".to_string(),
            password: String::new(),
            charset: Some(charset.to_string()),
            timezone: None,
        }
    }

    #[test]
    fn test_options_reject_unsafe_charset() {
        assert!(MysqlDriver::options(&credentials("utf8mb4")).is_ok());

        let err = MysqlDriver::options(&credentials("utf8; DROP TABLE users")).unwrap_err();
        assert!(matches!(err, DatabaseError::Config(_)));
    }

    #[test]
    fn test_convert_value() {
        assert_eq!(MysqlDriver::convert_value(Value::NULL), DatabaseValue::Null);
        assert_eq!(
            MysqlDriver::convert_value(Value::Bytes(b"abc".to_vec())),
            DatabaseValue::String("abc".to_string())
        );
        assert_eq!(
            MysqlDriver::convert_value(Value::Bytes(vec![0xff, 0xfe])),
            DatabaseValue::Bytes(vec![0xff, 0xfe])
        );
        assert_eq!(
            MysqlDriver::convert_value(Value::UInt(u64::MAX)),
            DatabaseValue::String(u64::MAX.to_string())
        );
        assert_eq!(
            MysqlDriver::convert_value(Value::Date(2024, 3, 9, 14, 5, 0, 0)),
            DatabaseValue::String("2024-03-09 14:05:00".to_string())
        );
        assert_eq!(
            MysqlDriver::convert_value(Value::Time(true, 1, 2, 3, 4, 0)),
            DatabaseValue::String("-26:03:04".to_string())
        );
    }

    #[tokio::test]
    #[ignore] // Run with: cargo test --features mysql -- --ignored
    async fn test_mysql_execute() {
        let (Ok(host), Ok(name), Ok(username)) = (
            std::env::var("MYSQL_HOST"),
            std::env::var("MYSQL_DB"),
            std::env::var("MYSQL_USER"),
        ) else {
            eprintln!("Skipping test: MYSQL_HOST/MYSQL_DB/MYSQL_USER not set");
            return;
        };
        let credentials = ResolvedCredentials {
            host,
            port: None,
            name,
            username,
            password: std::env::var("MYSQL_PASSWORD").unwrap_or_default(),
            charset: Some("utf8mb4".to_string()),
            timezone: None,
        };

        let driver = MysqlDriver::new();
        driver.connect(&credentials).await.unwrap();
        driver
            .execute("CREATE TEMPORARY TABLE toolkit_test (id INT AUTO_INCREMENT PRIMARY KEY, name TEXT)")
            .await
            .unwrap();
        let raw = driver
            .execute("INSERT INTO toolkit_test (name) VALUES ('a'), ('b')")
            .await
            .unwrap();
        assert_eq!(raw.affected_rows, 2);
        assert_eq!(raw.last_insert_id, Some(2));
        driver.disconnect().await.unwrap();
    }
}
