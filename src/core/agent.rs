//! Backend families
//!
//! The agent decides how literals and identifiers are escaped and which
//! driver a Link opens.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported backend families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Agent {
    /// MySQL/MariaDB family
    Mysql,
    /// PostgreSQL family
    Postgres,
    /// SQLite (in-process)
    Sqlite,
}

impl Agent {
    /// Convert the agent to its canonical string form
    pub fn to_str(&self) -> &'static str {
        match self {
            Agent::Mysql => "mysql",
            Agent::Postgres => "postgres",
            Agent::Sqlite => "sqlite",
        }
    }

    /// Quote character used around identifiers
    pub fn identifier_quote(&self) -> char {
        match self {
            Agent::Mysql => '`',
            Agent::Postgres | Agent::Sqlite => '"',
        }
    }

    /// Whether UPDATE/DELETE accept ORDER BY and LIMIT
    pub fn supports_update_limit(&self) -> bool {
        matches!(self, Agent::Mysql)
    }

    /// Whether a LIKE predicate needs an explicit `ESCAPE '\'` clause
    pub fn needs_like_escape_clause(&self) -> bool {
        !matches!(self, Agent::Mysql)
    }

    /// Default TCP port, if the backend is networked
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Agent::Mysql => Some(3306),
            Agent::Postgres => Some(5432),
            Agent::Sqlite => None,
        }
    }
}

impl std::fmt::Display for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl FromStr for Agent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mysql" | "mariadb" | "mysqli" | "mysql-family" => Ok(Agent::Mysql),
            "postgres" | "postgresql" | "pgsql" | "postgres-family" => Ok(Agent::Postgres),
            "sqlite" | "sqlite3" => Ok(Agent::Sqlite),
            _ => Err(format!("Invalid database agent: '{}'", s)),
        }
    }
}

impl TryFrom<String> for Agent {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Agent> for String {
    fn from(agent: Agent) -> Self {
        agent.to_str().to_string()
    }
}
