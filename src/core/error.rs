//! Error types for the database toolkit
//!
//! Every failure raised by the escaper, preparer, query builder, router and
//! drivers is a variant of [`DatabaseError`].

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Error types for database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Missing or contradictory connection credentials, or an unresolvable role
    #[error("Configuration error: {0}")]
    Config(String),

    /// Physical connect failure
    #[error("Connection to {host} failed{}: {message}", fmt_state(.state))]
    Connection {
        host: String,
        state: Option<String>,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The backend rejected a statement
    #[error("Query failed{}{}: {message} [{query}]", fmt_code(.code), fmt_state(.state))]
    Query {
        code: Option<i64>,
        state: Option<String>,
        message: String,
        query: String,
    },

    /// A value has no escaping rule
    #[error("Unsupported value: {0}")]
    UnsupportedValue(String),

    /// A named placeholder has no matching key
    #[error("Missing parameter :{name} in query [{query}]")]
    MissingParameter { name: String, query: String },

    /// Positional placeholders and leftover parameters differ in count
    #[error("Parameter count mismatch: {expected} placeholder(s), {found} parameter(s) in query [{query}]")]
    ParameterCount {
        expected: usize,
        found: usize,
        query: String,
    },

    /// The query builder cannot render its current state
    #[error("Query builder error: {0}")]
    BuilderState(String),

    /// No cached connection matches the requested host or role
    #[error("No connection found for {0}")]
    NotFound(String),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON configuration
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

fn fmt_state(state: &Option<String>) -> String {
    state
        .as_ref()
        .map(|s| format!(" (state {})", s))
        .unwrap_or_default()
}

fn fmt_code(code: &Option<i64>) -> String {
    code.map(|c| format!(" (code {})", c)).unwrap_or_default()
}

impl DatabaseError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Config(msg.into())
    }

    /// Create a connection error without a backend state code
    pub fn connection(host: impl Into<String>, message: impl Into<String>) -> Self {
        DatabaseError::Connection {
            host: host.into(),
            state: None,
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error carrying the backend's state code and source error
    pub fn connection_with_source(
        host: impl Into<String>,
        state: Option<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        DatabaseError::Connection {
            host: host.into(),
            state,
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a query error for the given statement
    pub fn query(message: impl Into<String>, query: impl Into<String>) -> Self {
        DatabaseError::Query {
            code: None,
            state: None,
            message: message.into(),
            query: query.into(),
        }
    }

    /// Create a query error with the backend's error code and SQLSTATE
    pub fn query_with_code(
        code: Option<i64>,
        state: Option<String>,
        message: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        DatabaseError::Query {
            code,
            state,
            message: message.into(),
            query: query.into(),
        }
    }

    pub fn unsupported_value<S: Into<String>>(msg: S) -> Self {
        DatabaseError::UnsupportedValue(msg.into())
    }

    pub fn missing_parameter(name: impl Into<String>, query: impl Into<String>) -> Self {
        DatabaseError::MissingParameter {
            name: name.into(),
            query: query.into(),
        }
    }

    pub fn parameter_count(expected: usize, found: usize, query: impl Into<String>) -> Self {
        DatabaseError::ParameterCount {
            expected,
            found,
            query: query.into(),
        }
    }

    pub fn builder_state<S: Into<String>>(msg: S) -> Self {
        DatabaseError::BuilderState(msg.into())
    }

    pub fn not_found<S: Into<String>>(what: S) -> Self {
        DatabaseError::NotFound(what.into())
    }

    /// Create a new transaction error
    pub fn transaction<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Transaction(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Other(msg.into())
    }

    /// The statement text attached to a query error, if any
    pub fn query_text(&self) -> Option<&str> {
        match self {
            DatabaseError::Query { query, .. }
            | DatabaseError::MissingParameter { query, .. }
            | DatabaseError::ParameterCount { query, .. } => Some(query),
            _ => None,
        }
    }
}

#[cfg(feature = "sqlite")]
impl DatabaseError {
    /// Map a rusqlite failure on `query` to a [`DatabaseError::Query`]
    pub(crate) fn from_sqlite(err: rusqlite::Error, query: &str) -> Self {
        let code = match &err {
            rusqlite::Error::SqliteFailure(e, _) => Some(i64::from(e.extended_code)),
            _ => None,
        };
        DatabaseError::query_with_code(code, None, err.to_string(), query)
    }
}

#[cfg(feature = "postgres")]
impl DatabaseError {
    /// Map a tokio-postgres failure on `query` to a [`DatabaseError::Query`]
    pub(crate) fn from_postgres(err: tokio_postgres::Error, query: &str) -> Self {
        let state = err.code().map(|c| c.code().to_string());
        let message = err
            .as_db_error()
            .map(|db| db.message().to_string())
            .unwrap_or_else(|| err.to_string());
        DatabaseError::query_with_code(None, state, message, query)
    }
}

#[cfg(feature = "mysql")]
impl DatabaseError {
    /// Map a mysql_async failure on `query` to a [`DatabaseError::Query`]
    pub(crate) fn from_mysql(err: mysql_async::Error, query: &str) -> Self {
        match err {
            mysql_async::Error::Server(server) => DatabaseError::query_with_code(
                Some(i64::from(server.code)),
                Some(server.state),
                server.message,
                query,
            ),
            other => DatabaseError::query(other.to_string(), query),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = DatabaseError::config("missing host");
        assert!(matches!(err, DatabaseError::Config(_)));

        let err = DatabaseError::query("syntax error", "SELEC 1");
        assert!(matches!(err, DatabaseError::Query { .. }));
        assert_eq!(err.query_text(), Some("SELEC 1"));

        let err = DatabaseError::parameter_count(1, 2, "id = ?");
        assert!(matches!(
            err,
            DatabaseError::ParameterCount {
                expected: 1,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_error_display() {
        let err = DatabaseError::connection("db1", "Connection refused");
        assert_eq!(err.to_string(), "Connection to db1 failed: Connection refused");

        let err = DatabaseError::query_with_code(
            Some(1064),
            Some("42000".to_string()),
            "You have an error in your SQL syntax",
            "SELEC 1",
        );
        assert_eq!(
            err.to_string(),
            "Query failed (code 1064) (state 42000): You have an error in your SQL syntax [SELEC 1]"
        );

        let err = DatabaseError::missing_parameter("id", "id = :id");
        assert_eq!(err.to_string(), "Missing parameter :id in query [id = :id]");
    }
}
