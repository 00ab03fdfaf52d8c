//! Connection configuration
//!
//! The configuration is plain data, deserialized from JSON:
//!
//! ```json
//! {
//!   "agent": "mysql",
//!   "sharding": true,
//!   "database": {
//!     "host": "db", "name": "app", "username": "app", "password": "secret",
//!     "master": { "host": "db-primary" },
//!     "slaves": [ { "host": "db-replica-1" }, { "host": "db-replica-2" } ]
//!   },
//!   "fetch_type": "array_assoc"
//! }
//! ```
//!
//! Role sub-configs (`master`, `slaves`) only override the fields they set.

use super::agent::Agent;
use super::error::{DatabaseError, Result};
use super::params::Params;
use super::result::{FetchType, QueryResult, DEFAULT_FETCH_LIMIT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Callback invoked with a failed query; its return value replaces the error
pub type ErrorHandler =
    Arc<dyn Fn(&DatabaseError, &str, &Params) -> Result<QueryResult> + Send + Sync>;

/// Free-form options keyed by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(HashMap<String, serde_json::Value>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Typed lookup; falls back to `default` when the key is absent or has another type
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.0
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or(default)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
}

/// Credentials of one host, possibly partial
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub charset: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<Box<Credentials>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slaves: Vec<Credentials>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("charset", &self.charset)
            .field("timezone", &self.timezone)
            .field("master", &self.master)
            .field("slaves", &self.slaves)
            .finish()
    }
}

impl Credentials {
    /// Credentials for `host`, with everything else unset
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Self::default()
        }
    }

    /// Fields set on `self` win, the rest come from `base`
    ///
    /// Role sub-configs are not carried over.
    pub fn merged_over(&self, base: &Credentials) -> Credentials {
        Credentials {
            host: self.host.clone().or_else(|| base.host.clone()),
            port: self.port.or(base.port),
            name: self.name.clone().or_else(|| base.name.clone()),
            username: self.username.clone().or_else(|| base.username.clone()),
            password: self.password.clone().or_else(|| base.password.clone()),
            charset: self.charset.clone().or_else(|| base.charset.clone()),
            timezone: self.timezone.clone().or_else(|| base.timezone.clone()),
            master: None,
            slaves: Vec::new(),
        }
    }

    /// Require host, name, username and password
    ///
    /// A charset, when set, must be a bare name (`[A-Za-z0-9_]+`) since it is
    /// spliced into connection init statements.
    pub fn resolve(&self) -> Result<ResolvedCredentials> {
        fn required(field: &Option<String>, what: &str) -> Result<String> {
            field
                .clone()
                .filter(|v| !v.is_empty() || what == "password")
                .ok_or_else(|| DatabaseError::config(format!("missing database {}", what)))
        }

        if let Some(charset) = &self.charset {
            check_charset(charset)?;
        }

        Ok(ResolvedCredentials {
            host: required(&self.host, "host")?,
            port: self.port,
            name: required(&self.name, "name")?,
            username: required(&self.username, "username")?,
            password: required(&self.password, "password")?,
            charset: self.charset.clone(),
            timezone: self.timezone.clone(),
        })
    }
}

/// Complete credentials for opening one connection
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedCredentials {
    pub host: String,
    pub port: Option<u16>,
    pub name: String,
    pub username: String,
    pub password: String,
    pub charset: Option<String>,
    pub timezone: Option<String>,
}

impl std::fmt::Debug for ResolvedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("username", &self.username)
            .field("charset", &self.charset)
            .field("timezone", &self.timezone)
            .finish_non_exhaustive()
    }
}

impl ResolvedCredentials {
    /// libpq-style `key=value` connection string
    pub fn postgres_connection_string(&self) -> String {
        fn quoted(value: &str) -> String {
            format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
        }

        let mut parts = vec![
            format!("host={}", quoted(&self.host)),
            format!(
                "port={}",
                self.port.or(Agent::Postgres.default_port()).unwrap_or(5432)
            ),
            format!("dbname={}", quoted(&self.name)),
            format!("user={}", quoted(&self.username)),
            format!("password={}", quoted(&self.password)),
        ];
        let mut options = Vec::new();
        if let Some(charset) = &self.charset {
            options.push(format!("-c client_encoding={}", charset));
        }
        if let Some(timezone) = &self.timezone {
            options.push(format!("-c TimeZone={}", timezone));
        }
        if !options.is_empty() {
            parts.push(format!("options={}", quoted(&options.join(" "))));
        }
        parts.join(" ")
    }
}

pub(crate) fn check_charset(charset: &str) -> Result<()> {
    let bare = !charset.is_empty()
        && charset
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if bare {
        Ok(())
    } else {
        Err(DatabaseError::config(format!("invalid charset '{}'", charset)))
    }
}

fn default_fetch_limit() -> usize {
    DEFAULT_FETCH_LIMIT
}

fn default_true() -> bool {
    true
}

/// Toolkit configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub agent: Agent,
    #[serde(default)]
    pub sharding: bool,
    pub database: Credentials,
    #[serde(default)]
    pub fetch_type: FetchType,
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
    /// Derive contiguous identifier ranges for multi-row inserts
    #[serde(default = "default_true")]
    pub contiguous_insert_ids: bool,
    #[serde(default)]
    pub options: Settings,
    #[serde(skip)]
    pub query_error_handler: Option<ErrorHandler>,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("agent", &self.agent)
            .field("sharding", &self.sharding)
            .field("database", &self.database)
            .field("fetch_type", &self.fetch_type)
            .field("fetch_limit", &self.fetch_limit)
            .field("contiguous_insert_ids", &self.contiguous_insert_ids)
            .field("options", &self.options)
            .field("query_error_handler", &self.query_error_handler.is_some())
            .finish()
    }
}

impl DatabaseConfig {
    pub fn new(agent: Agent, database: Credentials) -> Self {
        Self {
            agent,
            sharding: false,
            database,
            fetch_type: FetchType::default(),
            fetch_limit: DEFAULT_FETCH_LIMIT,
            contiguous_insert_ids: true,
            options: Settings::default(),
            query_error_handler: None,
        }
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: DatabaseConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    #[must_use]
    pub fn with_sharding(mut self, master: Credentials, slaves: Vec<Credentials>) -> Self {
        self.sharding = true;
        self.database.master = Some(Box::new(master));
        self.database.slaves = slaves;
        self
    }

    #[must_use]
    pub fn with_fetch_type(mut self, fetch_type: FetchType) -> Self {
        self.fetch_type = fetch_type;
        self
    }

    #[must_use]
    pub fn with_contiguous_insert_ids(mut self, enabled: bool) -> Self {
        self.contiguous_insert_ids = enabled;
        self
    }

    #[must_use]
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&DatabaseError, &str, &Params) -> Result<QueryResult> + Send + Sync + 'static,
    {
        self.query_error_handler = Some(Arc::new(handler));
        self
    }

    /// Check settings that can be rejected before any connection is attempted
    pub fn validate(&self) -> Result<()> {
        if self.fetch_limit == 0 {
            return Err(DatabaseError::config("fetch_limit must be greater than 0"));
        }
        if self.sharding && self.database.master.is_none() && self.database.slaves.is_empty() {
            return Err(DatabaseError::config(
                "sharding is enabled but neither master nor slaves are configured",
            ));
        }
        Ok(())
    }

    /// Credentials of the master role, merged over the base config
    pub fn master_credentials(&self) -> Credentials {
        match &self.database.master {
            Some(master) => master.merged_over(&self.database),
            None => self.database.merged_over(&Credentials::default()),
        }
    }

    /// Credentials of every configured replica, merged over the base config
    pub fn slave_credentials(&self) -> Vec<Credentials> {
        self.database
            .slaves
            .iter()
            .map(|slave| slave.merged_over(&self.database))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHARDED: &str = r#"{
        "agent": "mysql-family",
        "sharding": true,
        "database": {
            "host": "db", "port": 3307, "name": "app", "username": "app", "password": "secret",
            "master": { "host": "primary" },
            "slaves": [ { "host": "replica-1" }, { "host": "replica-2", "username": "ro" } ]
        },
        "fetch_type": "array_assoc",
        "options": { "log_queries": true }
    }"#;

    #[test]
    fn test_parse_sharded_config() {
        let config = DatabaseConfig::from_json_str(SHARDED).unwrap();
        assert_eq!(config.agent, Agent::Mysql);
        assert!(config.sharding);
        assert_eq!(config.fetch_type, FetchType::ArrayAssoc);
        assert_eq!(config.fetch_limit, DEFAULT_FETCH_LIMIT);
        assert!(config.contiguous_insert_ids);
        assert!(config.options.get_or("log_queries", false));

        let master = config.master_credentials().resolve().unwrap();
        assert_eq!(master.host, "primary");
        assert_eq!(master.port, Some(3307));
        assert_eq!(master.username, "app");

        let slaves = config.slave_credentials();
        assert_eq!(slaves.len(), 2);
        assert_eq!(slaves[1].username.as_deref(), Some("ro"));
        assert_eq!(slaves[1].password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_charset_must_be_a_bare_name() {
        let mut creds = Credentials {
            host: Some("db".to_string()),
            name: Some("app".to_string()),
            username: Some("app".to_string()),
            password: Some(String::new()),
            charset: Some("utf8mb4".to_string()),
            ..Credentials::default()
        };
        assert_eq!(creds.resolve().unwrap().charset.as_deref(), Some("utf8mb4"));

        for bad in ["", "utf8 COLLATE x", "latin1'; --"] {
            creds.charset = Some(bad.to_string());
            let err = creds.resolve().unwrap_err();
            assert!(matches!(err, DatabaseError::Config(_)));
        }
    }

    #[test]
    fn test_missing_credentials() {
        let creds = Credentials {
            host: Some("db".to_string()),
            name: Some("app".to_string()),
            ..Credentials::default()
        };
        let err = creds.resolve().unwrap_err();
        assert!(matches!(err, DatabaseError::Config(ref m) if m.contains("username")));
    }

    #[test]
    fn test_empty_password_is_allowed() {
        let creds = Credentials {
            host: Some("db".to_string()),
            name: Some("app".to_string()),
            username: Some("root".to_string()),
            password: Some(String::new()),
            ..Credentials::default()
        };
        assert!(creds.resolve().is_ok());
    }

    #[test]
    fn test_validate() {
        let json = r#"{ "agent": "sqlite", "sharding": true, "database": { "host": "x" } }"#;
        assert!(matches!(
            DatabaseConfig::from_json_str(json),
            Err(DatabaseError::Config(_))
        ));
        assert!(matches!(
            DatabaseConfig::from_json_str("{ not json"),
            Err(DatabaseError::Json(_))
        ));
    }

    #[test]
    fn test_debug_hides_password() {
        let config = DatabaseConfig::from_json_str(SHARDED).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_settings() {
        let mut settings = Settings::new();
        settings.set("retries", 3);
        assert_eq!(settings.get_or("retries", 0u32), 3);
        assert_eq!(settings.get_or("retries", String::new()), "");
        assert_eq!(settings.get_or("missing", 7u32), 7);
    }

    #[test]
    fn test_postgres_connection_string() {
        let creds = Credentials {
            host: Some("db".to_string()),
            name: Some("app".to_string()),
            username: Some("app".to_string()),
            password: Some("it's".to_string()),
            timezone: Some("UTC".to_string()),
            ..Credentials::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(
            creds.postgres_connection_string(),
            "host='db' port=5432 dbname='app' user='app' password='it\\'s' options='-c TimeZone=UTC'"
        );
    }
}
