//! # Rust DB Toolkit
//!
//! Safe SQL execution for MySQL, PostgreSQL and SQLite backends:
//!
//! - **Escaping**: backend-aware literal and identifier quoting
//! - **Templates**: `?`, typed (`%s`, `%i`, ...) and `:name` placeholders
//!   resolved into literal SQL
//! - **Query building**: fluent SELECT/INSERT/UPDATE/DELETE with joins,
//!   predicates, grouping, aggregates and JSON shaping
//! - **Routing**: master/replica topology over a host-keyed connection cache
//! - **Batches**: queued statements run in one transaction, with inserted ids
//!   tracked per statement
//!
//! ## Supported Databases
//!
//! | Database | Feature | Driver |
//! |----------|---------|--------|
//! | SQLite | `sqlite` (default) | rusqlite, bundled |
//! | PostgreSQL | `postgres` | tokio-postgres |
//! | MySQL | `mysql` | mysql_async |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rust_db_toolkit::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let db = Database::new(DatabaseConfig::new(
//!         Agent::Sqlite,
//!         Credentials {
//!             host: Some("local".into()),
//!             name: Some(":memory:".into()),
//!             username: Some("app".into()),
//!             password: Some(String::new()),
//!             ..Credentials::default()
//!         },
//!     ))?;
//!
//!     db.query(None, "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", params![]).await?;
//!     db.query(None, "INSERT INTO users (name) VALUES (?), (?)", params!["alice", "bob"]).await?;
//!
//!     let link = db.link(None).await?;
//!     let alice = link.builder("users").where_eq("name", "alice").get(&link).await?;
//!     println!("{:?}", alice);
//!     Ok(())
//! }
//! ```
//!
//! ### Batches
//!
//! ```rust,no_run
//! use rust_db_toolkit::prelude::*;
//!
//! # async fn demo(link: &Link) -> Result<()> {
//! let mut batch = link.batch();
//! batch
//!     .queue("INSERT INTO accounts (balance) VALUES (?)", params![100.0])?
//!     .queue("UPDATE totals SET n = n + ?", params![1])?;
//! batch.run().await?;
//! println!("inserted {:?}", batch.merged_result_ids());
//! # Ok(())
//! # }
//! ```

/// Core toolkit types
pub mod core;

/// Backend driver implementations
pub mod backends;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::core::{
        Agent, Batch, Credentials, Database, DatabaseConfig, DatabaseError, DatabaseValue,
        FetchType, FetchedRow, Link, Linker, Params, QueryBuilder, QueryResult, Record, Result,
        Role,
    };
    pub use crate::params;
}

// Re-export at root level for convenience
pub use core::{
    Agent, Batch, Credentials, Database, DatabaseConfig, DatabaseError, DatabaseValue, Escaper,
    FetchType, FetchedRow, Link, Linker, Params, Preparer, QueryBuilder, QueryResult, Record,
    Result, Role,
};

#[cfg(feature = "sqlite")]
pub use backends::SqliteDriver;
