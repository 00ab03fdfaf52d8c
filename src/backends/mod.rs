//! Backend drivers
//!
//! Concrete [`Driver`](crate::core::driver::Driver) implementations, one per
//! supported database family. Each is gated behind its cargo feature.

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDriver;

#[cfg(feature = "postgres")]
pub use postgres::PostgresDriver;

#[cfg(feature = "mysql")]
pub use mysql::MysqlDriver;
